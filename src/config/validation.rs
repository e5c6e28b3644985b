//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (window > 0, status code valid)
//! - Catch CORS combinations the browser would reject
//!
//! Returns all validation errors, not just the first.

use std::fmt;

use crate::config::schema::ServerOptions;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &ServerOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let app = &config.app;

    if app.rate_limit.window_ms == 0 {
        errors.push(ValidationError::new("app.rate_limit.window_ms", "must be greater than 0"));
    }
    if !(100..=599).contains(&app.rate_limit.status_code) {
        errors.push(ValidationError::new(
            "app.rate_limit.status_code",
            format!("{} is not an HTTP status code", app.rate_limit.status_code),
        ));
    }

    if let Some(csrf) = &app.csrf {
        if csrf.token.is_empty() {
            errors.push(ValidationError::new("app.csrf.token", "secret must not be empty"));
        }
    }

    if let Some(cors) = &app.cors {
        let wildcard = cors.origins.iter().any(|o| o == "*");
        if wildcard && cors.credentials {
            errors.push(ValidationError::new(
                "app.cors",
                "credentials cannot be combined with a wildcard origin",
            ));
        }
        if wildcard && cors.origins.len() > 1 {
            errors.push(ValidationError::new(
                "app.cors.origins",
                "\"*\" cannot be mixed with explicit origins",
            ));
        }
    }

    if app.cookie.secret.iter().any(String::is_empty) {
        errors.push(ValidationError::new("app.cookie.secret", "secrets must not be empty"));
    }

    if !config.socket.path.starts_with('/') || config.socket.path == "/" {
        errors.push(ValidationError::new(
            "socket.path",
            "must start with '/' and not be the root",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{CorsOptions, CsrfOptions};

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServerOptions::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ServerOptions::default();
        config.app.rate_limit.window_ms = 0;
        config.app.csrf = Some(CsrfOptions::new(""));
        config.app.cors = Some(CorsOptions {
            credentials: true,
            ..CorsOptions::default()
        });
        config.socket.path = "ws".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["app.rate_limit.window_ms", "app.csrf.token", "app.cors", "socket.path"]
        );
    }
}
