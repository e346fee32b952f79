use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::HOST},
    response::IntoResponse,
    routing,
};
use rearch::Container;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    api::{Error, OriginalUrl, ShortenPayload, ShortenedUrl},
    config::base_url_capsule,
    url_service::{ResolveError, ShortenError, UrlMappingService, url_mapping_service_capsule},
};

#[derive(Clone)]
pub struct AppState {
    pub url_service: Arc<dyn UrlMappingService>,
    /// Overrides the `Host`-derived prefix of returned links.
    pub base_url: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn from_container(container: &Container) -> Self {
        let (url_service, base_url) =
            container.read((url_mapping_service_capsule, base_url_capsule));
        Self {
            url_service,
            base_url,
        }
    }

    fn base_url_for(&self, headers: &HeaderMap) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            let host = headers
                .get(HOST)
                .and_then(|host| host.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{host}")
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/shorten",
            routing::post(shorten_url).get(resolve_shorten_literal),
        )
        .route("/{short_code}", routing::get(resolve_url))
        .with_state(state)
}

#[instrument(skip(state))]
async fn resolve_url(
    State(state): State<AppState>,
    Path(short_code): Path<String>,
) -> impl IntoResponse {
    state
        .url_service
        .resolve(&short_code)
        .await
        .map(|original_url| Json(OriginalUrl { original_url }))
        .map_err(|error: ResolveError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ResolveError::NotFound => {
                    info!(?err_uuid, %short_code, "Short code not found");
                    (
                        StatusCode::NOT_FOUND,
                        Json(Error {
                            error: "URL not found".to_owned(),
                            error_id: err_uuid.to_string(),
                        }),
                    )
                }
                ResolveError::Db(_) => {
                    error!(?err_uuid, ?error, "Encountered database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(Error {
                            error: "Internal server error".to_owned(),
                            error_id: err_uuid.to_string(),
                        }),
                    )
                }
            }
        })
}

/// `GET /shorten` is a lookup of the code "shorten", not a method mismatch.
async fn resolve_shorten_literal(state: State<AppState>) -> impl IntoResponse {
    resolve_url(state, Path("shorten".to_owned())).await
}

#[instrument(skip(state, headers))]
async fn shorten_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(ShortenPayload { url }): Json<ShortenPayload>,
) -> impl IntoResponse {
    state
        .url_service
        .shorten(url.as_str())
        .await
        .map(|mapping| {
            Json(ShortenedUrl {
                shortened_url: mapping.shortened_url(&state.base_url_for(&headers)),
            })
        })
        .map_err(|error: ShortenError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ShortenError::CodesExhausted | ShortenError::Internal(_) => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(Error {
                            error: "Internal server error".to_owned(),
                            error_id: err_uuid.to_string(),
                        }),
                    )
                }
            }
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
        response::Response,
    };
    use mockall::{mock, predicate::*};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::url_repo::{ShortCode, UrlMapping};

    use super::*;

    mock! {
        UrlMappingService {}

        #[async_trait]
        impl UrlMappingService for UrlMappingService {
            async fn shorten(&self, original_url: &str) -> Result<UrlMapping, ShortenError>;
            async fn resolve(&self, short_code: &str) -> Result<String, ResolveError>;
        }
    }

    fn app(mock_service: MockUrlMappingService, base_url: Option<&str>) -> Router {
        router(AppState {
            url_service: Arc::new(mock_service),
            base_url: base_url.map(ToOwned::to_owned),
        })
    }

    fn post_shorten(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/shorten")
            .header("content-type", "application/json")
            .header("host", "sho.rt:8000")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_shorten_returns_link_under_request_host() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service
            .expect_shorten()
            .with(eq("https://example.com/a"))
            .once()
            .return_once(|original_url| {
                Ok(UrlMapping {
                    short_code: ShortCode::new("abc123".to_owned()).unwrap(),
                    original_url: original_url.to_owned(),
                })
            });

        let response = app(mock_service, None)
            .oneshot(post_shorten(r#"{"url": "https://example.com/a"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "shortened_url": "http://sho.rt:8000/abc123" })
        );
    }

    #[tokio::test]
    async fn test_shorten_prefers_configured_base_url() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service.expect_shorten().once().return_once(|original_url| {
            Ok(UrlMapping {
                short_code: ShortCode::new("abc123".to_owned()).unwrap(),
                original_url: original_url.to_owned(),
            })
        });

        let response = app(mock_service, Some("https://go.example.com"))
            .oneshot(post_shorten(r#"{"url": "https://example.com/a"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "shortened_url": "https://go.example.com/abc123" })
        );
    }

    #[tokio::test]
    async fn test_shorten_invalid_url_is_unprocessable() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service.expect_shorten().never();

        let response = app(mock_service, None)
            .oneshot(post_shorten(r#"{"url": "not a url"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_shorten_missing_url_is_unprocessable() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service.expect_shorten().never();

        let response = app(mock_service, None)
            .oneshot(post_shorten(r#"{"link": "https://example.com"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_shorten_internal_error() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service
            .expect_shorten()
            .once()
            .return_once(|_| Err(ShortenError::Internal(anyhow!("test failure"))));

        let response = app(mock_service, None)
            .oneshot(post_shorten(r#"{"url": "https://example.com/a"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(Uuid::parse_str(body["error_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_resolve_found() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service
            .expect_resolve()
            .with(eq("abc123"))
            .once()
            .return_once(|_| Ok("https://example.com/a".to_owned()));

        let response = app(mock_service, None)
            .oneshot(get("/abc123"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "original_url": "https://example.com/a" })
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_code_is_not_found() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service
            .expect_resolve()
            .with(eq("zzzzzz"))
            .once()
            .return_once(|_| Err(ResolveError::NotFound));

        let response = app(mock_service, None)
            .oneshot(get("/zzzzzz"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "URL not found");
    }

    #[tokio::test]
    async fn test_get_shorten_is_not_found() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service.expect_shorten().never();
        mock_service
            .expect_resolve()
            .with(eq("shorten"))
            .once()
            .return_once(|_| Err(ResolveError::NotFound));

        let response = app(mock_service, None)
            .oneshot(get("/shorten"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "URL not found");
    }

    #[tokio::test]
    async fn test_resolve_db_error() {
        let mut mock_service = MockUrlMappingService::new();
        mock_service
            .expect_resolve()
            .once()
            .return_once(|_| Err(ResolveError::Db(anyhow!("test failure"))));

        let response = app(mock_service, None)
            .oneshot(get("/abc123"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
