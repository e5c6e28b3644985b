//! CORS policy construction.
//!
//! Request handling is entirely `tower_http::cors`; this module only turns
//! [`CorsOptions`] into a layer and rejects combinations the layer would
//! panic on at request time.

use axum::http::{HeaderName, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::config::CorsOptions;

/// Rejected CORS options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorsError {
    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),
    #[error("invalid CORS method: {0}")]
    InvalidMethod(String),
    #[error("invalid CORS header: {0}")]
    InvalidHeader(String),
    #[error("CORS credentials cannot be combined with a wildcard origin")]
    CredentialsWithWildcard,
}

fn header_names(names: &[String]) -> Result<Vec<HeaderName>, CorsError> {
    names
        .iter()
        .map(|n| {
            HeaderName::from_bytes(n.trim().as_bytes())
                .map_err(|_| CorsError::InvalidHeader(n.clone()))
        })
        .collect()
}

/// Build the CORS layer for `options`.
pub fn build_cors_layer(options: &CorsOptions) -> Result<CorsLayer, CorsError> {
    let wildcard = options.origins.iter().any(|o| o == "*");
    if wildcard && options.credentials {
        return Err(CorsError::CredentialsWithWildcard);
    }

    let origin = if wildcard {
        AllowOrigin::any()
    } else {
        let origins = options
            .origins
            .iter()
            .map(|o| HeaderValue::from_str(o).map_err(|_| CorsError::InvalidOrigin(o.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    let methods = options
        .methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| CorsError::InvalidMethod(m.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let allow_headers = if options.allowed_headers.is_empty() {
        AllowHeaders::mirror_request()
    } else {
        AllowHeaders::list(header_names(&options.allowed_headers)?)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(allow_headers)
        .expose_headers(ExposeHeaders::list(header_names(&options.exposed_headers)?))
        .allow_credentials(options.credentials);

    if let Some(secs) = options.max_age_secs {
        layer = layer.max_age(Duration::from_secs(secs));
    }
    Ok(layer)
}
