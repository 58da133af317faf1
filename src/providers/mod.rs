// =============================================================================
// Provider Clients — three external market-data services
// =============================================================================
//
// Each client wraps one upstream API and always returns a typed record:
// either live data (`source = API`) or the conservative fallback constant
// (`source = FALLBACK`) when the call misses its deadline, fails transport,
// returns a non-success status, or produces a body we cannot parse. A fetch
// never raises; the error reason rides along in the report.
//
// Fallbacks are deliberately conservative: the liquidity fallback reports a
// 999 bps spread so the spread gate fails closed, while the options and
// market-stats fallbacks are neutral.
// =============================================================================

pub mod liquidity;
pub mod market_stats;
pub mod options;

pub use liquidity::{LiquidityData, LiquidityProvider};
pub use market_stats::{MarketStatsData, MarketStatsProvider};
pub use options::{OptionsData, OptionsProvider};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::types::DataSource;

/// Outcome of one provider fetch. `data` is always populated.
#[derive(Debug, Clone)]
pub struct FetchReport<T> {
    pub data: T,
    pub source: DataSource,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl<T> FetchReport<T> {
    pub fn live(data: T, latency_ms: u64) -> Self {
        Self {
            data,
            source: DataSource::Api,
            error: None,
            latency_ms,
        }
    }

    pub fn fallback(data: T, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            data,
            source: DataSource::Fallback,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

/// Build a reqwest client with the provider's bearer key and deadline.
pub(crate) fn build_client(api_key: &str, timeout: std::time::Duration) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(val) = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(reqwest::header::AUTHORIZATION, val);
    }
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .expect("failed to build reqwest client")
}

/// GET `url` and parse the JSON body, failing on non-success statuses.
pub(crate) async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url} failed"))?;

    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .with_context(|| format!("GET {url}: body is not JSON"))?;

    if !status.is_success() {
        anyhow::bail!("GET {url} returned {status}: {body}");
    }

    Ok(body)
}

/// Reachability check shared by the three probes: any response that is not
/// a server error counts as reachable.
pub(crate) async fn probe_base(client: &reqwest::Client, base_url: &str) -> bool {
    match client.get(base_url).send().await {
        Ok(resp) => !resp.status().is_server_error(),
        Err(_) => false,
    }
}

/// Extract a numeric field that upstreams serialise as either a number or
/// a numeric string.
pub(crate) fn num_field(body: &Value, field: &str) -> Result<f64> {
    let val = body
        .get(field)
        .with_context(|| format!("response missing '{field}'"))?;
    if let Some(n) = val.as_f64() {
        Ok(n)
    } else if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("'{field}' value '{s}' is not numeric"))
    } else {
        anyhow::bail!("'{field}' is neither number nor string: {val}")
    }
}

/// Extract a string field.
pub(crate) fn str_field<'a>(body: &'a Value, field: &str) -> Result<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("response missing string '{field}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn num_field_accepts_numbers_and_numeric_strings() {
        let body = json!({"a": 1.5, "b": "2.25", "c": "wide", "d": null});
        assert_eq!(num_field(&body, "a").unwrap(), 1.5);
        assert_eq!(num_field(&body, "b").unwrap(), 2.25);
        assert!(num_field(&body, "c").is_err());
        assert!(num_field(&body, "d").is_err());
        assert!(num_field(&body, "missing").is_err());
    }

    #[test]
    fn fetch_report_constructors_set_source() {
        let live = FetchReport::live(1u8, 12);
        assert_eq!(live.source, DataSource::Api);
        assert!(live.error.is_none());

        let fb = FetchReport::fallback(2u8, "timed out", 600);
        assert_eq!(fb.source, DataSource::Fallback);
        assert_eq!(fb.error.as_deref(), Some("timed out"));
    }
}
