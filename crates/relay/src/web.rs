use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;

use glass_protocol::{ConfigResponse, ErrorResponse, SenderStatus, SignalingMessage};

use crate::receiver;
use crate::signaling;
use crate::state::RelayState;

/// Build the Axum router: upstream signaling, downstream offer/answer, the
/// advisory config/health surface, and static consumer assets (§4.8).
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(sender_ws_upgrade))
        .route("/offer", post(downstream_offer))
        .route("/config", get(config_response))
        .route("/health", get(health_check))
        .layer(RequestBodyLimitLayer::new(65_536))
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state))
        .fallback_service(ServeDir::new(&state.config.server.web_root))
}

/// GET /ws — upstream signaling upgrade for the producer (C1).
async fn sender_ws_upgrade(
    State(state): State<Arc<RelayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| signaling::handle_sender_ws(socket, state))
}

#[derive(Deserialize)]
struct OfferRequest {
    sdp: String,
}

/// POST /offer — downstream negotiation for one viewer (C2, §4.4). Offers
/// are answered only after the relay finishes gathering its own ICE
/// candidates — viewers never trickle.
async fn downstream_offer(
    State(state): State<Arc<RelayState>>,
    Json(req): Json<OfferRequest>,
) -> impl IntoResponse {
    match receiver::negotiate(Arc::clone(&state), req.sdp).await {
        Ok(answer_sdp) => {
            Json(SignalingMessage::Answer { sdp: answer_sdp }).into_response()
        }
        Err(e) if e.downcast_ref::<receiver::NoSenderConnected>().is_some() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(glass_protocol::VIDEO_NOT_READY)),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("failed to negotiate downstream offer: {e}");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Failed to negotiate connection.")),
            )
                .into_response()
        }
    }
}

/// GET /config — advisory snapshot, never authoritative (§4.2).
async fn config_response(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let status = if state.sender_connected().await {
        SenderStatus::Connected
    } else {
        SenderStatus::Disconnected
    };
    Json(ConfigResponse {
        sender_url: state.config.server.sender_url.clone(),
        status,
        num_receivers: state.receivers.len().await,
        codec: "H264".to_string(),
        latency_supported: true,
    })
}

/// GET /health — plain liveness probe.
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use glass_protocol::RelayConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_config() -> RelayConfig {
        RelayConfig::default()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let state = Arc::new(RelayState::new(test_config()));
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn offer_is_rejected_before_a_sender_connects() {
        let state = Arc::new(RelayState::new(test_config()));
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/offer")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"sdp":"v=0..."}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, glass_protocol::VIDEO_NOT_READY);
    }

    #[tokio::test]
    async fn config_reports_disconnected_sender_by_default() {
        let state = Arc::new(RelayState::new(test_config()));
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: ConfigResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.status, SenderStatus::Disconnected);
        assert_eq!(parsed.num_receivers, 0);
    }
}
