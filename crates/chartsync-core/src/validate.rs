//! Name validation for releases and charts

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, Result};

/// Longest release name the packaging engine accepts
pub const MAX_RELEASE_NAME_LEN: usize = 53;

static DNS1123_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid regex")
});

/// Validate a release name: a DNS-1123 subdomain of at most 53 characters
pub fn validate_release_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CoreError::InvalidReleaseName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(invalid(&format!(
            "must be at most {} characters",
            MAX_RELEASE_NAME_LEN
        )));
    }
    if !DNS1123_SUBDOMAIN.is_match(name) {
        return Err(invalid(
            "must consist of lower case alphanumeric characters, '-' or '.', \
             and must start and end with an alphanumeric character",
        ));
    }
    Ok(())
}

/// Validate a chart name used as a chart cache key
///
/// The name becomes one directory under the cache root, so it must be a
/// single path component and must not start with '.'.
pub fn validate_chart_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CoreError::InvalidChartName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("must not contain path separators"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("must not contain control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_names() {
        assert!(validate_release_name("nginx").is_ok());
        assert!(validate_release_name("my-app.v2").is_ok());
        assert!(validate_release_name(&"a".repeat(MAX_RELEASE_NAME_LEN)).is_ok());

        assert!(validate_release_name("").is_err());
        assert!(validate_release_name("Nginx").is_err());
        assert!(validate_release_name("-nginx").is_err());
        assert!(validate_release_name("nginx_1").is_err());
        assert!(validate_release_name(&"a".repeat(MAX_RELEASE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_chart_names() {
        assert!(validate_chart_name("sample").is_ok());
        assert!(validate_chart_name("my_chart-1.0").is_ok());

        assert!(validate_chart_name("").is_err());
        assert!(validate_chart_name("..").is_err());
        assert!(validate_chart_name(".index").is_err());
        assert!(validate_chart_name("a/b").is_err());
        assert!(validate_chart_name("..\\b").is_err());
    }
}
