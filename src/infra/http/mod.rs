mod compile;
mod cors;
mod middleware;
mod state;
mod templates;

pub use state::{GatewayOptions, GatewayState};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::{application::templates::CacheOutcome, domain::types::RenderOutput};

use self::middleware::{log_responses, set_request_context};

pub const RENDER_CACHE_HEADER: HeaderName = HeaderName::from_static("x-render-cache");

pub fn build_router(state: GatewayState) -> Router {
    let cors = state.cors.clone();
    let body_limit = match state.request_limit {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    let compile_routes = Router::new()
        .route("/pdf", post(compile::compile_pdf))
        .route("/svg", post(compile::compile_svg))
        .layer(body_limit);

    Router::new()
        .route("/", get(templates::health))
        .merge(compile_routes)
        .route("/{*file}", get(templates::fetch_template))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .layer(cors)
        .with_state(state)
}

fn artifact_response(output: RenderOutput, cache: Option<CacheOutcome>) -> Response {
    let mime_type = output.mime_type();
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(mime_type))],
        output.bytes,
    )
        .into_response();
    if let Some(cache) = cache {
        response
            .headers_mut()
            .insert(RENDER_CACHE_HEADER, HeaderValue::from_static(cache.as_str()));
    }
    response
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
