//! Synchronous validation of user-supplied configuration

use url::Url;

/// Configuration rejected at create/update time
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("channel name '{0}' is already in use")]
    DuplicateName(String),
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Require a non-blank string
pub fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Missing { field })
    } else {
        Ok(())
    }
}

/// Parse an absolute http(s) URL with a host
pub fn http_url(field: &'static str, value: &str) -> Result<Url, ValidationError> {
    require(field, value)?;
    let url = Url::parse(value.trim()).map_err(|e| ValidationError::invalid(field, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::invalid(
                field,
                format!("unsupported scheme '{}'", other),
            ))
        }
    }

    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ValidationError::invalid(field, "missing host"));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require() {
        assert!(require("name", "ok").is_ok());
        assert_eq!(
            require("name", "   "),
            Err(ValidationError::Missing { field: "name" })
        );
    }

    #[test]
    fn test_http_url() {
        assert!(http_url("url", "https://example.com/health").is_ok());
        assert!(http_url("url", "ftp://example.com").is_err());
        assert!(http_url("url", "not a url").is_err());
        assert!(http_url("url", "").is_err());
    }
}
