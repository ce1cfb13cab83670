#![allow(clippy::collapsible_if)]

mod compose;
mod config;
mod fetch;
mod http;
mod keys;
mod label;
mod layout;
mod profile;
mod state;
#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::label::LabelFont;
use crate::state::AppState;
use axum::Router;
use axum::http::header;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;

fn build_app(state: Arc<AppState>) -> Router {
    // 0 means unlimited; the limiter's semaphore caps out at MAX_PERMITS.
    let max_in_flight = match state.config.max_in_flight_requests {
        0 => Semaphore::MAX_PERMITS,
        limit => limit.min(Semaphore::MAX_PERMITS),
    };
    http::router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let font = LabelFont::resolve(config.label_font_path.as_deref(), &config.system_font_paths);
    let label_font = font.source().to_string();
    let state = Arc::new(AppState::new(config, font)?);
    info!(
        background_url = %state.config.background_url,
        profile_api_url = %state.config.profile_api_url,
        icon_api_url = %state.config.icon_api_url,
        active_keys = state.keys.active_count(),
        fetch_timeout_seconds = state.config.fetch_timeout.as_secs(),
        slot_fetch_concurrency = state.config.slot_fetch_concurrency,
        max_in_flight_requests = state.config.max_in_flight_requests,
        label_font = %label_font,
        pet_slot = state.config.layout.pet_skin_slot.is_some(),
        "startup config summary"
    );
    let app = build_app(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "outfit renderer listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn layered_app_serves_health_and_rejects_keyless_render() {
        let server = test_support::spawn_upstream().await;
        for max_in_flight in [0, 1, usize::MAX] {
            let mut config = test_config(&server.base_url);
            config.max_in_flight_requests = max_in_flight;
            let state = Arc::new(AppState::new(config, LabelFont::builtin()).unwrap());
            let app = build_app(state);

            let response = app
                .clone()
                .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "limit {max_in_flight}");

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/api?region=me&uid=12345")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(server.hits.total(), 0);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let server = test_support::spawn_upstream().await;
        let state =
            Arc::new(AppState::new(test_config(&server.base_url), LabelFont::builtin()).unwrap());
        let response = build_app(state)
            .oneshot(Request::builder().uri("/render").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
