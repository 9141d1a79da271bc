//! HTTP surface.
//!
//! | Method | Path                 | Action                                      |
//! |--------|----------------------|---------------------------------------------|
//! | POST   | `/{name}`            | append a patch (text or binary body)        |
//! | GET    | `/{name}/{version}`  | fetch a patch by version                    |
//! | GET    | `/{name}?version=N`  | fetch a patch by version                    |
//! | GET    | `/{name}?patch=<id>` | fetch a patch by id                         |
//! | GET    | `/$/ping`            | liveness                                    |
//! | POST   | `/$/rpc`             | JSON operations, see [`rpc`]                |
//!
//! Log and registry calls block (file I/O, coordination locks), so handlers
//! run them on the blocking pool.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

pub mod rpc;

use crate::codec::{self, PatchFormat};
use crate::coord::CoordError;
use crate::log::LogError;
use crate::patch::{Patch, PatchError};
use crate::registry::{DataRegistry, DataSource, RegistryError};
use crate::types::{Id, Version};

/// Errors returned to HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Unavailable(m)
            | Self::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl From<PatchError> for ApiError {
    fn from(e: PatchError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<LogError> for ApiError {
    fn from(e: LogError) -> Self {
        let message = e.to_string();
        match e {
            LogError::BadPatch(_) | LogError::Patch(_) => Self::BadRequest(message),
            LogError::Sequence { .. } | LogError::DuplicateId(_) => Self::Conflict(message),
            LogError::Coordination(CoordError::LockTimeout { .. }) => Self::Unavailable(message),
            LogError::Store(_) | LogError::Coordination(_) | LogError::LockPoisoned => {
                Self::Internal(message)
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let message = e.to_string();
        match e {
            RegistryError::BadName(_) | RegistryError::UnknownProvider(_) => {
                Self::BadRequest(message)
            }
            RegistryError::NotFound(_) => Self::NotFound(message),
            RegistryError::Exists(_) | RegistryError::Disabled(_) => Self::Conflict(message),
            RegistryError::Log(e) => e.into(),
            RegistryError::Config(_) | RegistryError::Io(_) | RegistryError::LockPoisoned => {
                Self::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }
        let body = Json(json!({
            "error": self.message(),
            "code": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

#[derive(Clone)]
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected for shared state
pub struct AppState {
    registry: Arc<DataRegistry>,
}

impl AppState {
    #[must_use]
    pub const fn new(registry: Arc<DataRegistry>) -> Self {
        Self { registry }
    }
}

/// Build the router over `registry`.
pub fn router(registry: Arc<DataRegistry>) -> Router {
    Router::new()
        .route("/$/ping", get(ping).post(ping))
        .route("/$/rpc", post(rpc_handler))
        .route("/{name}", post(append_handler).get(fetch_query_handler))
        .route("/{name}/{version}", get(fetch_version_handler))
        .with_state(AppState::new(registry))
}

/// Run `f` on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("request task failed: {e}")))?
}

pub(crate) fn lookup(registry: &DataRegistry, name: &str) -> Result<Arc<DataSource>, ApiError> {
    registry
        .resolve(name)?
        .ok_or_else(|| ApiError::NotFound(format!("no such data source: {name}")))
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn patch_response(patch: &Patch, headers: &HeaderMap) -> Result<Response, ApiError> {
    let format = PatchFormat::from_content_type(header_str(headers, header::ACCEPT));
    let body = codec::encode(format, patch)
        .map_err(|e| ApiError::Internal(format!("failed to encode patch: {e}")))?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()))],
        body,
    )
        .into_response())
}

async fn ping() -> Json<Value> {
    Json(json!({ "value": "pong" }))
}

#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
async fn append_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let format = PatchFormat::from_content_type(header_str(&headers, header::CONTENT_TYPE));
    let registry = Arc::clone(&state.registry);
    run_blocking(move || {
        let source = lookup(&registry, &name)?;
        let patch = codec::decode(format, &body)?;
        let id = patch
            .id()
            .ok_or_else(|| ApiError::BadRequest("patch has no id".to_string()))?;
        let version = source.log().append(&patch)?;
        Ok(Json(json!({
            "version": version.value(),
            "id": id.as_param(),
        })))
    })
    .await
}

#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
async fn fetch_version_handler(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let version =
        Version::from_param(&version).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let registry = Arc::clone(&state.registry);
    let patch = run_blocking(move || fetch_by_version(&registry, &name, version)).await?;
    patch_response(&patch, &headers)
}

#[derive(Debug, Deserialize)]
struct FetchQuery {
    version: Option<String>,
    patch: Option<String>,
}

#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
async fn fetch_query_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let registry = Arc::clone(&state.registry);
    let patch = match (query.version, query.patch) {
        (Some(version), _) => {
            let version =
                Version::from_param(&version).map_err(|e| ApiError::BadRequest(e.to_string()))?;
            run_blocking(move || fetch_by_version(&registry, &name, version)).await?
        }
        (None, Some(patch)) => {
            let id = Id::from_string(&patch);
            run_blocking(move || {
                let source = lookup(&registry, &name)?;
                source
                    .log()
                    .fetch_by_id(&id)?
                    .ok_or_else(|| ApiError::NotFound(format!("no patch {id} in {name}")))
            })
            .await?
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "expected a 'version' or 'patch' parameter".to_string(),
            ));
        }
    };
    patch_response(&patch, &headers)
}

fn fetch_by_version(
    registry: &DataRegistry,
    name: &str,
    version: Version,
) -> Result<Patch, ApiError> {
    let source = lookup(registry, name)?;
    source
        .log()
        .fetch(version)?
        .ok_or_else(|| ApiError::NotFound(format!("no version {} in {name}", version.value())))
}

#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
async fn rpc_handler(
    State(state): State<AppState>,
    Json(request): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let registry = Arc::clone(&state.registry);
    run_blocking(move || rpc::dispatch(&registry, &request).map(Json)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CONTENT_TYPE_BINARY;
    use crate::patch::{ChangeItem, PatchHeader, Quad};
    use crate::provider::{MemProvider, PROVIDER_MEM, ProviderRegistry};
    use crate::types::Node;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn registry() -> Arc<DataRegistry> {
        let providers = ProviderRegistry::new(PROVIDER_MEM).with(Arc::new(MemProvider::new(8)));
        let registry = DataRegistry::new(providers);
        registry.create("ds", None, None).expect("create");
        Arc::new(registry)
    }

    fn patch(previous: Option<&Id>) -> Patch {
        Patch::transaction(
            PatchHeader::with_ids(&Id::new(), previous),
            vec![ChangeItem::AddQuad(Quad::new(
                None,
                Node::iri("http://example/s"),
                Node::iri("http://example/p"),
                Node::iri("http://example/o"),
            ))],
        )
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, body.to_vec())
    }

    fn post_patch(uri: &str, content_type: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .expect("request")
    }

    #[test]
    fn test_error_status_mapping() {
        let sequence = LogError::Sequence {
            expected: None,
            declared: Some(Id::new()),
        };
        assert_eq!(ApiError::from(sequence).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(LogError::BadPatch("x".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        let timeout = LogError::Coordination(CoordError::LockTimeout {
            path: "/l".to_string(),
        });
        assert_eq!(ApiError::from(timeout).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::from(RegistryError::NotFound("ds".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RegistryError::Log(LogError::LockPoisoned)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_ping() {
        let app = router(registry());
        let request = Request::builder().uri("/$/ping").body(Body::empty()).expect("request");
        let (status, _) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_append_then_fetch() {
        let registry = registry();
        let first = patch(None);
        let body = codec::encode(PatchFormat::Text, &first).expect("encode");

        let (status, body) = send(
            router(Arc::clone(&registry)),
            post_patch("/ds", "application/rdf-patch", body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reply: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(reply["version"], 1);

        // Binary upload of the next patch.
        let second = patch(first.id().as_ref());
        let bytes = codec::encode(PatchFormat::Binary, &second).expect("encode");
        let (status, _) = send(
            router(Arc::clone(&registry)),
            post_patch("/ds", CONTENT_TYPE_BINARY, bytes),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder().uri("/ds/1").body(Body::empty()).expect("request");
        let (status, body) = send(router(Arc::clone(&registry)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(codec::decode(PatchFormat::Text, &body).expect("decode"), first);

        let request = Request::builder()
            .uri("/ds?version=2")
            .header(header::ACCEPT, CONTENT_TYPE_BINARY)
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(router(Arc::clone(&registry)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(codec::decode(PatchFormat::Binary, &body).expect("decode"), second);

        let uri = format!("/ds?patch={}", first.id().expect("id").as_param());
        let request = Request::builder().uri(uri).body(Body::empty()).expect("request");
        let (status, _) = send(router(Arc::clone(&registry)), request).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder().uri("/ds/3").body(Body::empty()).expect("request");
        let (status, _) = send(router(registry), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_concurrent_rpc_creates() {
        let registry = registry();
        let requests = (0..5).map(|n| {
            let body = json!({"operation": "create_datasource", "name": format!("ds{n}")});
            let request = Request::builder()
                .method("POST")
                .uri("/$/rpc")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request");
            send(router(Arc::clone(&registry)), request)
        });
        for (status, _) in futures::future::join_all(requests).await {
            assert_eq!(status, StatusCode::OK);
        }
        // "ds" from setup plus five more.
        assert_eq!(registry.len().expect("len"), 6);
    }

    #[tokio::test]
    async fn test_rejections() {
        let registry = registry();

        let (status, _) = send(
            router(Arc::clone(&registry)),
            post_patch("/ds", "application/rdf-patch", b"XX bad .\n".to_vec()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let stray = patch(Some(&Id::new()));
        let body = codec::encode(PatchFormat::Text, &stray).expect("encode");
        let (status, _) = send(
            router(Arc::clone(&registry)),
            post_patch("/ds", "application/rdf-patch", body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            router(Arc::clone(&registry)),
            post_patch("/nosuch", "application/rdf-patch", body),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::builder().uri("/ds/abc").body(Body::empty()).expect("request");
        let (status, _) = send(router(registry), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
