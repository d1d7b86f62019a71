use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{Any, CorsLayer};

use crate::infra::error::InfraError;

use super::{RENDER_CACHE_HEADER, middleware::REQUEST_ID_HEADER};

/// CORS policy for browser clients. No origins means any origin may call the gateway.
pub(super) fn cors_layer(origins: &[String]) -> Result<CorsLayer, InfraError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .expose_headers([RENDER_CACHE_HEADER, REQUEST_ID_HEADER]);

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        tracing::info!(target = "rendergate::http::cors", "CORS allows any origin");
        return Ok(cors.allow_origin(Any).allow_headers(Any));
    }

    let allowed = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| {
                InfraError::configuration(format!("invalid CORS origin `{origin}`"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        target = "rendergate::http::cors",
        origins = ?origins,
        "CORS restricted to configured origins"
    );
    Ok(cors
        .allow_origin(allowed)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}
