//! Queue ARN and URL derivation
//!
//! Queue identity is `(region, name)` under a fixed emulator account. The
//! URL and ARN are derived deterministically from that pair and never change
//! after creation.

/// Account ID used for all emulated resources
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Derive the ARN for a queue
pub fn queue_arn(region: &str, account: &str, name: &str) -> String {
    format!("arn:aws:sqs:{region}:{account}:{name}")
}

/// Derive the client-facing URL for a queue
pub fn queue_url(region: &str, account: &str, name: &str) -> String {
    format!("http://sqs.{region}.localhost:4566/{account}/{name}")
}

/// Extract `(region, account, name)` from a queue ARN
pub fn parse_queue_arn(arn: &str) -> Option<(&str, &str, &str)> {
    let mut parts = arn.splitn(6, ':');
    if parts.next()? != "arn" || parts.next()? != "aws" || parts.next()? != "sqs" {
        return None;
    }
    let region = parts.next()?;
    let account = parts.next()?;
    let name = parts.next()?;
    if region.is_empty() || account.is_empty() || name.is_empty() {
        return None;
    }
    Some((region, account, name))
}
