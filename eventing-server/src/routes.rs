//! Axum surface: service endpoints plus the catch-all that feeds the bridge.

use std::collections::BTreeMap;

use axum::{
    Form, Json, Router,
    body::{Body, Bytes},
    extract::{FromRequest, Query, Request, State},
    http::{Method as HttpMethod, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use eventing_core::bridge::{BridgeRequest, BridgeResponse, Method, STATUS_BAD_REQUEST};
use eventing_core::error::DispatchError;
use eventing_core::feed::{FeedPump, JsonLinesFeed};
use serde_json::{Map, Value, json};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .route("/feed/events", post(ingest_handler))
        .fallback(bridge_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "eventing server is running",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let stats = state.dispatcher.stats();
    let accepting = !state.dispatcher.is_closed();

    let body = json!({
        "status": if accepting { "healthy" } else { "draining" },
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
        "checks": {
            "backend": {
                "kind": state.config.backend.kind().to_string(),
            },
            "dispatcher": {
                "accepting": accepting,
                "active_keys": state.dispatcher.active_keys(),
                "tracked_keys": state.dispatcher.tracked_keys(),
                "stats": stats,
            },
            "feed": {
                "tracked_keys": state.sequences.tracked_keys(),
            },
            "timers": {
                "pending": state.timers.len(),
                "next_deadline": state.timers.next_deadline().map(|at| at.to_rfc3339()),
            },
            "recent_failures": state.failures.snapshot(),
        }
    });

    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Accepts a JSON-lines batch of change events and forwards it to the
/// dispatcher. Responds once every line has been submitted, not processed.
async fn ingest_handler(State(state): State<AppState>, body: Bytes) -> AppResult<Response> {
    if state.dispatcher.is_closed() {
        return Err(DispatchError::ShuttingDown.into());
    }

    let feed = JsonLinesFeed::new(body.as_ref()).with_sequences(state.sequences.clone());
    let report = FeedPump::new(feed, state.dispatcher.clone())
        .run(state.shutdown.child_token())
        .await?;
    info!(
        forwarded = report.forwarded,
        rejected = report.rejected,
        "feed batch ingested"
    );

    Ok((StatusCode::ACCEPTED, Json(report)).into_response())
}

/// Every request without a dedicated route is handed to the bridge. Query
/// string parameters are merged with form or JSON body parameters; body
/// values win.
async fn bridge_handler(State(state): State<AppState>, request: Request) -> Response {
    let method = match *request.method() {
        HttpMethod::GET => Method::Get,
        HttpMethod::POST => Method::Post,
        _ => return bridge_response(BridgeResponse::not_found()),
    };
    let path = request.uri().path().to_string();

    let mut params = match Query::<BTreeMap<String, String>>::try_from_uri(request.uri()) {
        Ok(Query(params)) => params,
        Err(rejection) => {
            debug!(path = %path, error = %rejection, "unreadable query string");
            return bridge_response(BridgeResponse::empty(STATUS_BAD_REQUEST));
        }
    };
    if method == Method::Post {
        match body_params(request, &state).await {
            Ok(body) => params.extend(body),
            Err(reason) => {
                debug!(path = %path, error = %reason, "unreadable request body");
                return bridge_response(BridgeResponse::empty(STATUS_BAD_REQUEST));
            }
        }
    }

    let mut bridge_request = BridgeRequest::new(method, path);
    bridge_request.params = params;
    bridge_response(state.bridge.handle(&bridge_request).await)
}

async fn body_params(
    request: Request,
    state: &AppState,
) -> Result<BTreeMap<String, String>, String> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let Json(body) = Json::<Map<String, Value>>::from_request(request, state)
            .await
            .map_err(|rejection| rejection.body_text())?;
        Ok(body
            .into_iter()
            .filter_map(|(name, value)| param_text(value).map(|text| (name, text)))
            .collect())
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(body) = Form::<BTreeMap<String, String>>::from_request(request, state)
            .await
            .map_err(|rejection| rejection.body_text())?;
        Ok(body)
    } else {
        Ok(BTreeMap::new())
    }
}

fn param_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn bridge_response(response: BridgeResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status == StatusCode::OK {
        (status, Json(Value::Object(response.body))).into_response()
    } else {
        let mut empty = Response::new(Body::empty());
        *empty.status_mut() = status;
        empty
    }
}
