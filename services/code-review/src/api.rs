//! Review API
//!
//! JSON endpoints for reviewing and optimizing code and managing the stored
//! user API key.
//!
//! Endpoints:
//! - POST   /v1/review      `{code, language?, api_key?}` → `{feedback}`
//! - POST   /v1/optimize    `{code, language?, api_key?}` → `{optimized_code}`
//! - GET    /v1/credential  stored key status (never the raw key)
//! - PUT    /v1/credential  `{api_key}` store a user key
//! - DELETE /v1/credential  forget the user key, fall back to the pool
//! - GET    /v1/languages   supported languages
//!
//! A request without `api_key` uses the stored key, or the pool when none
//! is stored. Failures use `{"error":{"type","message","request_id","credential_prompt"}}`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use key_pool::Operation;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::Error;
use crate::key_store::KeyStore;
use crate::review::{DEFAULT_LANGUAGE, Reviewer, SUPPORTED_LANGUAGES};
use crate::service::ServiceMetrics;

/// Shared state for review API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub reviewer: Arc<Reviewer>,
    pub key_store: Arc<KeyStore>,
    pub metrics: ServiceMetrics,
}

/// Build the review API router.
pub fn build_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/review", post(review_handler))
        .route("/v1/optimize", post(optimize_handler))
        .route(
            "/v1/credential",
            get(get_credential)
                .put(put_credential)
                .delete(delete_credential),
        )
        .route("/v1/languages", get(list_languages))
        .with_state(state)
}

/// Request body for review and optimize.
#[derive(Deserialize)]
struct CodeRequest {
    code: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct CredentialRequest {
    api_key: String,
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(
    status: StatusCode,
    kind: &str,
    message: &str,
    request_id: &str,
    credential_prompt: bool,
) -> Response {
    json_response(
        status,
        serde_json::json!({
            "error": {
                "type": kind,
                "message": message,
                "request_id": request_id,
                "credential_prompt": credential_prompt,
            }
        }),
    )
}

fn service_error_response(error: &Error, request_id: &str) -> Response {
    error_response(
        error.status(),
        error.kind(),
        &error.to_string(),
        request_id,
        error.prompts_for_credential(),
    )
}

fn rejection_response(rejection: JsonRejection, request_id: &str) -> Response {
    error_response(
        rejection.status(),
        "invalid_request",
        &rejection.body_text(),
        request_id,
        false,
    )
}

/// POST /v1/review
async fn review_handler(
    State(state): State<ApiState>,
    body: Result<Json<CodeRequest>, JsonRejection>,
) -> Response {
    run_operation(&state, Operation::Review, body, new_request_id()).await
}

/// POST /v1/optimize
async fn optimize_handler(
    State(state): State<ApiState>,
    body: Result<Json<CodeRequest>, JsonRejection>,
) -> Response {
    run_operation(&state, Operation::Optimization, body, new_request_id()).await
}

#[instrument(skip_all, fields(request_id = %request_id, operation = operation.label()))]
async fn run_operation(
    state: &ApiState,
    operation: Operation,
    body: Result<Json<CodeRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    let _in_flight = state.metrics.begin_request();
    let start = Instant::now();

    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            state.metrics.record_error();
            warn!(error = %rejection.body_text(), "rejected request body");
            return rejection_response(rejection, &request_id);
        }
    };

    // An explicit non-blank key wins; otherwise the stored key or the sentinel
    let user_key = match body.api_key.filter(|k| !k.trim().is_empty()) {
        Some(key) => key,
        None => state.key_store.effective_key().await,
    };

    let result = match operation {
        Operation::Review => state
            .reviewer
            .review_code(&body.code, body.language.as_deref(), Some(&user_key))
            .await
            .map(|feedback| serde_json::json!({ "feedback": feedback })),
        Operation::Optimization => state
            .reviewer
            .optimize_code(&body.code, body.language.as_deref(), Some(&user_key))
            .await
            .map(|optimized| serde_json::json!({ "optimized_code": optimized })),
    };

    let elapsed = start.elapsed().as_secs_f64();
    match result {
        Ok(payload) => {
            crate::metrics::record_request(operation.label(), "success", elapsed);
            info!(duration_ms = (elapsed * 1000.0) as u64, "request completed");
            json_response(StatusCode::OK, payload)
        }
        Err(e) => {
            state.metrics.record_error();
            crate::metrics::record_request(operation.label(), e.kind(), elapsed);
            if let Error::Pool(pool_error) = &e {
                crate::metrics::record_upstream_error(pool_error.kind.label());
                warn!(
                    kind = %pool_error.kind,
                    attempts = pool_error.attempts,
                    credential = %pool_error
                        .credential_used
                        .as_ref()
                        .map(|c| c.fingerprint())
                        .unwrap_or_default(),
                    "request failed"
                );
            } else {
                warn!(kind = e.kind(), error = %e, "request rejected");
            }
            service_error_response(&e, &request_id)
        }
    }
}

async fn credential_status(state: &ApiState) -> serde_json::Value {
    match state.key_store.get().await {
        Some(credential) => serde_json::json!({
            "configured": true,
            "source": credential.origin().label(),
            "fingerprint": credential.fingerprint(),
        }),
        None => serde_json::json!({
            "configured": !state.reviewer.executor().pool().is_empty(),
            "source": "pool",
        }),
    }
}

/// GET /v1/credential
async fn get_credential(State(state): State<ApiState>) -> Response {
    json_response(StatusCode::OK, credential_status(&state).await)
}

/// PUT /v1/credential
#[instrument(skip_all, fields(request_id = tracing::field::Empty))]
async fn put_credential(
    State(state): State<ApiState>,
    body: Result<Json<CredentialRequest>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());

    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return rejection_response(rejection, &request_id),
    };

    if let Err(e) = state.key_store.set(&body.api_key).await {
        warn!(kind = e.kind(), error = %e, "failed to store API key");
        return service_error_response(&e, &request_id);
    }
    json_response(StatusCode::OK, credential_status(&state).await)
}

/// DELETE /v1/credential
async fn delete_credential(State(state): State<ApiState>) -> Response {
    match state.key_store.clear().await {
        Ok(_) => json_response(StatusCode::OK, credential_status(&state).await),
        Err(e) => {
            warn!(error = %e, "failed to clear API key");
            service_error_response(&e, &new_request_id())
        }
    }
}

/// GET /v1/languages
async fn list_languages() -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "default": DEFAULT_LANGUAGE,
            "languages": SUPPORTED_LANGUAGES,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use key_pool::{CredentialPool, Executor};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use transport::{GenerateRequest, Transport, TransportFailure};

    type Responder = Box<dyn Fn(&str) -> transport::Result<String> + Send + Sync>;

    /// Transport double keyed on the credential it receives.
    struct ScriptedTransport {
        responder: Responder,
        keys: Mutex<Vec<String>>,
    }

    impl Transport for ScriptedTransport {
        fn id(&self) -> &str {
            "scripted"
        }

        fn execute<'a>(
            &'a self,
            credential: &'a str,
            _request: &'a GenerateRequest,
        ) -> Pin<Box<dyn Future<Output = transport::Result<String>> + Send + 'a>> {
            self.keys.lock().unwrap().push(credential.to_string());
            let result = (self.responder)(credential);
            Box::pin(async move { result })
        }
    }

    struct Harness {
        state: ApiState,
        transport: Arc<ScriptedTransport>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn keys(&self) -> Vec<String> {
            self.transport.keys.lock().unwrap().clone()
        }
    }

    async fn harness(
        pool_keys: &[&str],
        responder: impl Fn(&str) -> transport::Result<String> + Send + Sync + 'static,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport {
            responder: Box::new(responder),
            keys: Mutex::new(Vec::new()),
        });
        let pool = Arc::new(CredentialPool::new(
            pool_keys.iter().map(|k| k.to_string()).collect(),
        ));
        let executor = Arc::new(Executor::new(pool, transport.clone()));
        let key_store = KeyStore::load(dir.path().join("user-key.json"))
            .await
            .unwrap();

        Harness {
            state: ApiState {
                reviewer: Arc::new(Reviewer::new(executor, "gemini-2.5-flash")),
                key_store: Arc::new(key_store),
                metrics: ServiceMetrics::new(),
            },
            transport,
            _dir: dir,
        }
    }

    async fn send(
        state: &ApiState,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = build_api_router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn quota() -> TransportFailure {
        TransportFailure::new("Quota exceeded for quota metric 'GenerateContent'").with_status(429)
    }

    #[tokio::test]
    async fn review_returns_feedback() {
        let h = harness(&["POOL-A"], |_| Ok("## Looks good".into())).await;

        let (status, json) = send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "let x = 1;", "language": "rust" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["feedback"], "## Looks good");
        assert_eq!(h.keys(), vec!["POOL-A"]);
    }

    #[tokio::test]
    async fn optimize_returns_unfenced_code() {
        let h = harness(&["POOL-A"], |_| Ok("```js\nconst x = 1;\n```".into())).await;

        let (status, json) = send(
            &h.state,
            "POST",
            "/v1/optimize",
            Some(serde_json::json!({ "code": "var x = 1" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["optimized_code"], "const x = 1;");
    }

    #[tokio::test]
    async fn quota_on_pool_rotates_transparently() {
        let h = harness(&["A", "B"], |key| {
            if key == "A" { Err(quota()) } else { Ok("fine".into()) }
        })
        .await;

        let (status, json) = send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "x" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["feedback"], "fine");
        assert_eq!(h.keys(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn stored_key_is_used_when_request_has_none() {
        let h = harness(&["POOL-A"], |_| Ok("ok".into())).await;

        let (status, _) = send(
            &h.state,
            "PUT",
            "/v1/credential",
            Some(serde_json::json!({ "api_key": "AIzaStored9876" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "x" })),
        )
        .await;
        send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "x", "api_key": "AIzaExplicit" })),
        )
        .await;

        assert_eq!(h.keys(), vec!["AIzaStored9876", "AIzaExplicit"]);
    }

    #[tokio::test]
    async fn user_key_quota_prompts_for_credential() {
        let h = harness(&["POOL-A"], |_| Err(quota())).await;

        let (status, json) = send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "x", "api_key": "AIzaUser" })),
        )
        .await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["error"]["type"], "quota_exceeded");
        assert_eq!(json["error"]["credential_prompt"], true);
        assert!(
            json["error"]["request_id"]
                .as_str()
                .unwrap()
                .starts_with("req_")
        );
        assert_eq!(h.keys(), vec!["AIzaUser"]);
    }

    #[tokio::test]
    async fn empty_pool_without_key_is_unauthorized() {
        let h = harness(&[], |_| Ok("unused".into())).await;

        let (status, json) = send(
            &h.state,
            "POST",
            "/v1/optimize",
            Some(serde_json::json!({ "code": "x" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["type"], "no_credential_available");
        assert!(h.keys().is_empty());
    }

    #[tokio::test]
    async fn validation_errors_are_bad_request() {
        let h = harness(&["POOL-A"], |_| Ok("unused".into())).await;

        let (status, json) = send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "empty_code");
        assert_eq!(json["error"]["credential_prompt"], false);

        let (status, json) = send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "x", "language": "cobol" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "unsupported_language");

        assert!(h.keys().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_gets_json_error() {
        let h = harness(&["POOL-A"], |_| Ok("unused".into())).await;

        let response = build_api_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/review")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn credential_lifecycle_never_exposes_raw_key() {
        let h = harness(&["POOL-A"], |_| Ok("unused".into())).await;

        let (_, json) = send(&h.state, "GET", "/v1/credential", None).await;
        assert_eq!(json["source"], "pool");
        assert_eq!(json["configured"], true);
        assert!(json.get("fingerprint").is_none());

        let (status, json) = send(
            &h.state,
            "PUT",
            "/v1/credential",
            Some(serde_json::json!({ "api_key": "AIzaSecretValue1234" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["source"], "user");
        assert!(json["fingerprint"].as_str().unwrap().ends_with("1234"));
        assert!(!json.to_string().contains("AIzaSecretValue"));

        let (status, json) = send(&h.state, "DELETE", "/v1/credential", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["source"], "pool");
    }

    #[tokio::test]
    async fn blank_credential_rejected() {
        let h = harness(&[], |_| Ok("unused".into())).await;

        let (status, json) = send(
            &h.state,
            "PUT",
            "/v1/credential",
            Some(serde_json::json!({ "api_key": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "blank_key");

        let (_, json) = send(&h.state, "GET", "/v1/credential", None).await;
        assert_eq!(json["configured"], false);
    }

    #[tokio::test]
    async fn languages_lists_all_with_default() {
        let h = harness(&[], |_| Ok("unused".into())).await;

        let (status, json) = send(&h.state, "GET", "/v1/languages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["default"], "javascript");
        let languages = json["languages"].as_array().unwrap();
        assert_eq!(languages.len(), 16);
        assert_eq!(languages[0]["value"], "javascript");
        assert_eq!(languages[0]["label"], "JavaScript");
    }

    #[tokio::test]
    async fn request_counters_track_outcomes() {
        let h = harness(&[], |_| Ok("unused".into())).await;

        send(
            &h.state,
            "POST",
            "/v1/review",
            Some(serde_json::json!({ "code": "x" })),
        )
        .await;

        use std::sync::atomic::Ordering;
        assert_eq!(h.state.metrics.requests_total.load(Ordering::Relaxed), 1);
        assert_eq!(h.state.metrics.errors_total.load(Ordering::Relaxed), 1);
        assert_eq!(h.state.metrics.in_flight.load(Ordering::Relaxed), 0);
    }
}
