//! Input validation for item names, tags and policy durations

use crate::error::{VaultError, VaultResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Maximum allowed item name length
const MAX_NAME_LENGTH: usize = 127;

/// Maximum number of tags on one item version
const MAX_TAGS: usize = 15;

/// Maximum tag key length
const MAX_TAG_KEY_LENGTH: usize = 512;

/// Maximum tag value length
const MAX_TAG_VALUE_LENGTH: usize = 256;

static NAME_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[0-9a-zA-Z-]+$"));

// Bare "P" and "PT" carry no component and are rejected separately.
static DURATION_PATTERN: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r"^P(?:\d+Y)?(?:\d+M)?(?:\d+W)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+S)?)?$")
});

fn pattern(compiled: &'static Lazy<Result<Regex, regex::Error>>) -> VaultResult<&'static Regex> {
    compiled
        .as_ref()
        .map_err(|e| VaultError::Internal(format!("Invalid validation pattern: {}", e)))
}

/// Validate an item name
///
/// # Security Checks
/// - Enforces length limits (1..=127)
/// - Restricts the character set to ASCII alphanumerics and hyphen
pub fn validate_name(name: &str) -> VaultResult<()> {
    if name.is_empty() {
        return Err(VaultError::validation("Item name cannot be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(VaultError::Validation(format!(
            "Item name exceeds maximum length of {} characters",
            MAX_NAME_LENGTH
        )));
    }
    if !pattern(&NAME_PATTERN)?.is_match(name) {
        return Err(VaultError::Validation(format!(
            "Item name '{}' may only contain letters, digits and '-'",
            name
        )));
    }
    Ok(())
}

/// Validate a tag map
pub fn validate_tags(tags: &BTreeMap<String, String>) -> VaultResult<()> {
    if tags.len() > MAX_TAGS {
        return Err(VaultError::Validation(format!(
            "At most {} tags are allowed",
            MAX_TAGS
        )));
    }
    for (key, value) in tags {
        if key.is_empty() || key.len() > MAX_TAG_KEY_LENGTH {
            return Err(VaultError::Validation(format!(
                "Tag key must be 1..={} characters",
                MAX_TAG_KEY_LENGTH
            )));
        }
        if value.len() > MAX_TAG_VALUE_LENGTH {
            return Err(VaultError::Validation(format!(
                "Tag '{}' value exceeds {} characters",
                key, MAX_TAG_VALUE_LENGTH
            )));
        }
    }
    Ok(())
}

/// Validate an ISO-8601 duration such as `P90D` or `PT12H`
pub fn validate_iso_duration(value: &str) -> VaultResult<()> {
    let has_component = value.chars().any(|c| c.is_ascii_digit());
    if !has_component || value.ends_with('T') || !pattern(&DURATION_PATTERN)?.is_match(value) {
        return Err(VaultError::Validation(format!(
            "'{}' is not an ISO-8601 duration",
            value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert!(validate_name("k1").is_ok());
        assert!(validate_name("my-cert-2").is_ok());
        assert!(validate_name(&"a".repeat(127)).is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(128)).is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("under_score").is_err());
        assert!(validate_name("../etc").is_err());
    }

    #[test]
    fn durations() {
        for ok in ["P90D", "P1Y2M", "PT12H", "P1DT30M", "P2W"] {
            assert!(validate_iso_duration(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["P", "PT", "90D", "P1DT", "P-1D", ""] {
            assert!(validate_iso_duration(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn tag_limits() {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "dev".to_string());
        assert!(validate_tags(&tags).is_ok());

        tags.insert(String::new(), "x".to_string());
        assert!(validate_tags(&tags).is_err());
    }
}
