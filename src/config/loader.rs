//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerOptions;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerOptions, ConfigError> {
    let config: ServerOptions = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerOptions, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{CompressionLevel, SinkKind};
    use crate::config::trust_proxy::TrustProxy;
    use std::io::Write;

    #[test]
    fn test_load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[listener]
host = "127.0.0.1"
port = 3000

[app]
trust_proxy = "loopback"

[app.compression]
threshold = 512
level = "best"
zstd = false

[app.cookie]
secret = "keyboard cat"

[app.cors]
origins = ["https://example.com"]
credentials = true

[app.csrf]
token = "s3cret"
header_name = "X-CSRF"

[app.rate_limit]
window_ms = 1000
limit = 100

[socket]
path = "/live"

[logger]
sink = "tracing"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.app.trust_proxy, Some(TrustProxy::List("loopback".into())));
        assert_eq!(config.app.compression.threshold, 512);
        assert_eq!(config.app.compression.level, CompressionLevel::Best);
        assert!(!config.app.compression.zstd);
        assert!(config.app.compression.gzip);
        assert_eq!(config.app.cookie.secret, vec!["keyboard cat".to_string()]);
        assert!(config.app.cookie.decode);
        let csrf = config.app.csrf.unwrap();
        assert_eq!(csrf.header_name.as_deref(), Some("X-CSRF"));
        assert_eq!(csrf.cookie_name, None);
        assert_eq!(config.app.rate_limit.limit, 100);
        assert_eq!(config.app.rate_limit.status_code, 429);
        assert_eq!(config.socket.path, "/live");
        assert_eq!(config.logger.sink, SinkKind::Tracing);
    }

    #[test]
    fn test_trust_proxy_shapes() {
        let config = parse_config("[app]\ntrust_proxy = true\n").unwrap();
        assert_eq!(config.app.trust_proxy, Some(TrustProxy::Bool(true)));

        let config = parse_config("[app]\ntrust_proxy = 2\n").unwrap();
        assert_eq!(config.app.trust_proxy, Some(TrustProxy::Hops(2)));

        let config = parse_config("").unwrap();
        assert_eq!(config.app.trust_proxy, None);
    }

    #[test]
    fn test_rejects_invalid_config() {
        match parse_config("[app.rate_limit]\nwindow_ms = 0\n") {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(matches!(parse_config("listener = 3"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            load_config(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_error_messages() {
        let errors = vec![
            ValidationError {
                field: "app.rate_limit.window_ms",
                message: "must be greater than zero".into(),
            },
            ValidationError {
                field: "socket.path",
                message: "must start with '/'".into(),
            },
        ];
        assert_eq!(
            ConfigError::Validation(errors).to_string(),
            "Validation failed: app.rate_limit.window_ms: must be greater than zero, \
             socket.path: must start with '/'"
        );
        let io = ConfigError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.to_string(), "IO error: gone");
    }
}
