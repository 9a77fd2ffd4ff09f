//! Input validation for the visit pipeline
//!
//! Rejects malformed page-visit events before they touch any shared state.

use anyhow::{anyhow, Result};

/// Maximum accepted URL length
pub const MAX_URL_LENGTH: usize = 2048;

/// Maximum accepted title length
pub const MAX_TITLE_LENGTH: usize = 512;

/// Browser-internal URL prefixes that never enter the pipeline
pub const INTERNAL_URL_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "about:",
    "edge://",
    "brave://",
    "devtools://",
    "view-source:",
    "moz-extension://",
];

/// Validate a page URL
pub fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(anyhow!("url cannot be empty"));
    }

    if url.len() > MAX_URL_LENGTH {
        return Err(anyhow!(
            "url too long: {} chars (max: {})",
            url.len(),
            MAX_URL_LENGTH
        ));
    }

    if url.chars().any(|c| c.is_control()) {
        return Err(anyhow!("url contains control characters"));
    }

    let lower = url.to_ascii_lowercase();
    if let Some(prefix) = INTERNAL_URL_PREFIXES.iter().find(|p| lower.starts_with(**p)) {
        return Err(anyhow!("internal url scheme '{prefix}' is not ingested"));
    }

    Ok(())
}

/// Validate a visit timestamp (seconds since epoch)
pub fn validate_timestamp(ts: f64) -> Result<()> {
    if !ts.is_finite() {
        return Err(anyhow!("timestamp must be finite, got: {ts}"));
    }

    if ts < 0.0 {
        return Err(anyhow!("timestamp cannot be negative, got: {ts}"));
    }

    Ok(())
}

/// Validate a page title (empty is allowed, control characters are not)
pub fn validate_title(title: &str) -> Result<()> {
    if title.len() > MAX_TITLE_LENGTH {
        return Err(anyhow!(
            "title too long: {} chars (max: {})",
            title.len(),
            MAX_TITLE_LENGTH
        ));
    }

    if title.chars().any(|c| c.is_control() && c != '\t') {
        return Err(anyhow!("title contains control characters"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_url() {
        assert!(validate_url("https://docs.rs/tokio").is_ok());
        assert!(validate_url("http://localhost:3000/app").is_ok());
    }

    #[test]
    fn test_invalid_url() {
        assert!(validate_url("").is_err());
        assert!(validate_url("   ").is_err());
        assert!(validate_url(&"x".repeat(3000)).is_err());
        assert!(validate_url("https://a.com/\x00").is_err());
    }

    #[test]
    fn test_internal_schemes_rejected() {
        assert!(validate_url("chrome://settings").is_err());
        assert!(validate_url("about:blank").is_err());
        assert!(validate_url("CHROME://flags").is_err());
        assert!(validate_url("view-source:https://a.com").is_err());
    }

    #[test]
    fn test_timestamp() {
        assert!(validate_timestamp(0.0).is_ok());
        assert!(validate_timestamp(1_700_000_000.5).is_ok());
        assert!(validate_timestamp(f64::NAN).is_err());
        assert!(validate_timestamp(f64::INFINITY).is_err());
        assert!(validate_timestamp(-1.0).is_err());
    }

    #[test]
    fn test_title() {
        assert!(validate_title("").is_ok());
        assert!(validate_title("Rust Programming Language").is_ok());
        assert!(validate_title(&"t".repeat(1000)).is_err());
        assert!(validate_title("bad\x07title").is_err());
    }
}
