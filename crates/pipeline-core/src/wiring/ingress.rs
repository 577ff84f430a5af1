//! HTTP ingress - extract を直接呼ぶ公開 URL
//!
//! 認証なし・任意のメソッド / パス / オリジン / ヘッダを受け付けます。
//! スケジュールを経由しない独立した入口です。
//!
//! リクエストボディは JSON として解釈できればそのまま payload に、
//! できなければ無視して `{}` を渡します。
//! 関数の戻り値が `{"statusCode": .., "body": ..}` の形ならそれを HTTP
//! レスポンスに写します。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::WiringError;
use crate::domain::{FunctionName, InvocationRecord, OutcomeKind, Trigger};
use crate::platform::ComputeHost;

const INVOCATION_HEADER: HeaderName = HeaderName::from_static("x-invocation-id");

#[derive(Clone)]
struct IngressState {
    host: Arc<ComputeHost>,
    target: FunctionName,
}

/// Every request, whatever its method or path, invokes `target`.
pub fn router(host: Arc<ComputeHost>, target: FunctionName) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .fallback(invoke_target)
        .with_state(IngressState { host, target })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn invoke_target(
    State(state): State<IngressState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let payload = payload_from_body(&body);
    let trigger = Trigger::Http {
        method: method.to_string(),
        path: uri.path().to_string(),
    };

    match state.host.invoke(&state.target, trigger, payload, 1).await {
        Ok(record) => response_for(&record),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn payload_from_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return json!({});
    }
    match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "request body is not JSON; ignoring it");
            json!({})
        }
    }
}

fn response_for(record: &InvocationRecord) -> Response {
    let outcome = &record.outcome;
    let mut response = match outcome.kind {
        OutcomeKind::Succeeded => proxy_response(outcome.response.clone().unwrap_or(Value::Null)),
        OutcomeKind::Failed => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": outcome.reason, "access_denied": outcome.access_denied })),
        )
            .into_response(),
        OutcomeKind::TimedOut => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "error": outcome.reason })),
        )
            .into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(&record.id.to_string()) {
        response.headers_mut().insert(INVOCATION_HEADER, value);
    }
    response
}

fn proxy_response(value: Value) -> Response {
    let status = value
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok());

    match status {
        Some(status) => match value.get("body") {
            Some(Value::String(text)) => (status, text.clone()).into_response(),
            Some(other) => (status, Json(other.clone())).into_response(),
            None => status.into_response(),
        },
        None => Json(value).into_response(),
    }
}

/// A served ingress. Its lifetime is tied to the deployment of its target.
#[derive(Debug)]
pub struct HttpIngress {
    pub url: String,
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl HttpIngress {
    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
        tracing::info!(url = %self.url, "HTTP ingress stopped");
    }
}

#[tracing::instrument(level = "info", skip(host), fields(target = %target))]
pub async fn bind_http(
    listen: SocketAddr,
    host: Arc<ComputeHost>,
    target: FunctionName,
) -> Result<HttpIngress, WiringError> {
    if host.spec(&target).is_none() {
        return Err(WiringError::FunctionNotDeployed(target));
    }

    let listener = TcpListener::bind(listen)
        .await
        .map_err(|source| WiringError::Bind {
            addr: listen,
            source,
        })?;
    let addr = listener
        .local_addr()
        .map_err(|source| WiringError::Bind {
            addr: listen,
            source,
        })?;
    let url = format!("http://{addr}/");

    let app = router(host, target);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        if let Err(e) = server.await {
            tracing::error!(error = %e, "HTTP ingress failed");
        }
    });

    tracing::warn!(
        url = %url,
        "HTTP ingress is public: no authentication, any origin, any method"
    );
    Ok(HttpIngress {
        url,
        addr,
        shutdown_tx,
        join,
    })
}
