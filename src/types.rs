// =============================================================================
// Shared types used across the Gatekeeper admission engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of an incoming trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Long,
    Short,
}

impl SignalType {
    /// Case-insensitive parse; canonical form is upper-case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Which slice of the trading day the signal arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketSession {
    Open,
    Midday,
    PowerHour,
    Afterhours,
}

impl MarketSession {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "OPEN" => Some(Self::Open),
            "MIDDAY" => Some(Self::Midday),
            "POWER_HOUR" => Some(Self::PowerHour),
            "AFTERHOURS" => Some(Self::Afterhours),
            _ => None,
        }
    }

    /// Regular-hours sessions allow entries; afterhours does not.
    pub fn is_tradeable(&self) -> bool {
        !matches!(self, Self::Afterhours)
    }
}

impl Default for MarketSession {
    fn default() -> Self {
        Self::Open
    }
}

impl std::fmt::Display for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Midday => write!(f, "MIDDAY"),
            Self::PowerHour => write!(f, "POWER_HOUR"),
            Self::Afterhours => write!(f, "AFTERHOURS"),
        }
    }
}

/// Signal quality tier used for store conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Medium,
    High,
    Extreme,
}

impl QualityTier {
    /// Numeric priority: EXTREME (3) > HIGH (2) > MEDIUM (1).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Medium => 1,
            Self::High => 2,
            Self::Extreme => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "EXTREME" => Some(Self::Extreme),
            _ => None,
        }
    }

    /// Derive a tier from an ai_score when the payload carries none.
    pub fn from_ai_score(score: f64) -> Self {
        if score >= 9.0 {
            Self::Extreme
        } else if score >= 7.0 {
            Self::High
        } else {
            Self::Medium
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Market-maker positioning direction reported by the options provider.
/// POSITIVE favors LONGs, NEGATIVE favors SHORTs, NEUTRAL favors neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GammaBias {
    Positive,
    Negative,
    Neutral,
}

impl GammaBias {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "POSITIVE" => Some(Self::Positive),
            "NEGATIVE" => Some(Self::Negative),
            "NEUTRAL" => Some(Self::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for GammaBias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "POSITIVE"),
            Self::Negative => write!(f, "NEGATIVE"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Tape speed reported by the liquidity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeVelocity {
    Slow,
    Normal,
    Fast,
}

impl TradeVelocity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "SLOW" => Some(Self::Slow),
            "NORMAL" => Some(Self::Normal),
            "FAST" => Some(Self::Fast),
            _ => None,
        }
    }
}

/// Whether a context sub-record came from a live API call or the
/// conservative fallback constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Api,
    Fallback,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api => write!(f, "API"),
            Self::Fallback => write!(f, "FALLBACK"),
        }
    }
}

/// Chart timeframe a stored signal or phase event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "3M")]
    M3,
    #[serde(rename = "5M")]
    M5,
    #[serde(rename = "15M")]
    M15,
    #[serde(rename = "30M")]
    M30,
    #[serde(rename = "1H")]
    H1,
    #[serde(rename = "4H")]
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H4,
    ];

    pub fn minutes(&self) -> u32 {
        match self {
            Self::M3 => 3,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H4 => 240,
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            3 => Some(Self::M3),
            5 => Some(Self::M5),
            15 => Some(Self::M15),
            30 => Some(Self::M30),
            60 => Some(Self::H1),
            240 => Some(Self::H4),
            _ => None,
        }
    }

    /// Accepts "15", "15M", "15m", "1H", "60", "4h", "240", etc.
    pub fn parse(s: &str) -> Option<Self> {
        let up = s.trim().to_uppercase();
        match up.as_str() {
            "3M" | "3" => Some(Self::M3),
            "5M" | "5" => Some(Self::M5),
            "15M" | "15" => Some(Self::M15),
            "30M" | "30" => Some(Self::M30),
            "1H" | "60" | "60M" => Some(Self::H1),
            "4H" | "240" | "240M" => Some(Self::H4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M3 => write!(f, "3M"),
            Self::M5 => write!(f, "5M"),
            Self::M15 => write!(f, "15M"),
            Self::M30 => write!(f, "30M"),
            Self::H1 => write!(f, "1H"),
            Self::H4 => write!(f, "4H"),
        }
    }
}

/// Position of a timeframe in the decision hierarchy
/// (regime > bias > setup > entry > scalp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TfRole {
    Regime,
    Bias,
    Setup,
    Entry,
    Scalp,
}

impl TfRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "REGIME" => Some(Self::Regime),
            "BIAS" => Some(Self::Bias),
            "SETUP" => Some(Self::Setup),
            "ENTRY" => Some(Self::Entry),
            "SCALP" => Some(Self::Scalp),
            _ => None,
        }
    }
}

impl std::fmt::Display for TfRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regime => write!(f, "REGIME"),
            Self::Bias => write!(f, "BIAS"),
            Self::Setup => write!(f, "SETUP"),
            Self::Entry => write!(f, "ENTRY"),
            Self::Scalp => write!(f, "SCALP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!(SignalType::parse("long"), Some(SignalType::Long));
        assert_eq!(SignalType::parse(" Short "), Some(SignalType::Short));
        assert_eq!(SignalType::parse("sideways"), None);
        assert_eq!(
            MarketSession::parse("power_hour"),
            Some(MarketSession::PowerHour)
        );
        assert_eq!(GammaBias::parse("Neutral"), Some(GammaBias::Neutral));
        assert_eq!(TradeVelocity::parse("FAST"), Some(TradeVelocity::Fast));
    }

    #[test]
    fn quality_ranks_are_ordered() {
        assert!(QualityTier::Extreme.rank() > QualityTier::High.rank());
        assert!(QualityTier::High.rank() > QualityTier::Medium.rank());
    }

    #[test]
    fn quality_derived_from_ai_score() {
        assert_eq!(QualityTier::from_ai_score(9.5), QualityTier::Extreme);
        assert_eq!(QualityTier::from_ai_score(7.0), QualityTier::High);
        assert_eq!(QualityTier::from_ai_score(4.2), QualityTier::Medium);
    }

    #[test]
    fn timeframe_parse_accepts_both_notations() {
        assert_eq!(Timeframe::parse("15"), Some(Timeframe::M15));
        assert_eq!(Timeframe::parse("15m"), Some(Timeframe::M15));
        assert_eq!(Timeframe::parse("1H"), Some(Timeframe::H1));
        assert_eq!(Timeframe::parse("240"), Some(Timeframe::H4));
        assert_eq!(Timeframe::parse("2H"), None);
    }

    #[test]
    fn timeframe_serialises_as_label() {
        assert_eq!(serde_json::to_string(&Timeframe::H4).unwrap(), "\"4H\"");
        assert_eq!(
            serde_json::to_string(&MarketSession::PowerHour).unwrap(),
            "\"POWER_HOUR\""
        );
    }
}
