// =============================================================================
// HTTP boundary — thin adapter between webhooks and the decision core
// =============================================================================

pub mod auth;
pub mod rest;
