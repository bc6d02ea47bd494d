//! Router-level test harness: in-memory database, manual clock, test session keys.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

use crate::{
    auth::testing::{decoding_key, session_token},
    clock::testing::ManualClock,
    config::{Config, RateLimitBackend},
    db::testing::memory_pool,
    handlers::email::WEBHOOK_SECRET_HEADER,
    ratelimit::RateLimitConfig,
    rest,
    token::DEFAULT_LINK_TTL_SECS,
    AppState,
};

pub const WEBHOOK_SECRET: &str = "webhook-test-secret";

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    router: Router,
}

fn test_config(link_secret: Option<&str>) -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        public_base_url: Url::parse("https://aurum.test").unwrap(),
        session_public_key_path: "keys/test/session_public.pem".into(),
        link_secret: link_secret.map(str::to_string),
        link_ttl_secs: DEFAULT_LINK_TTL_SECS,
        email_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        rate_limit_backend: RateLimitBackend::Sqlite,
        rate_limits: RateLimitConfig::default(),
        request_timeout: Duration::from_secs(10),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config(Some("link-test-secret"))).await
    }

    pub async fn without_link_secret() -> Self {
        Self::with_config(test_config(None)).await
    }

    async fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::at_epoch_secs(1_760_000_000));
        let state = AppState::new(config, memory_pool().await, decoding_key(), clock.clone());
        let router = rest::router(state.clone());
        Self {
            state,
            clock,
            router,
        }
    }

    pub async fn oneshot(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        uid: Option<&str>,
        json: Option<String>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(uid) = uid {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", session_token(uid)));
        }
        let body = match json {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json)
            }
            None => Body::empty(),
        };
        self.oneshot(builder.body(body).unwrap()).await
    }

    pub async fn send(&self, method: &str, uri: &str, uid: Option<&str>) -> (StatusCode, Value) {
        into_parts(self.request(method, uri, uid, None).await).await
    }

    pub async fn send_json(
        &self,
        method: &str,
        uri: &str,
        uid: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        into_parts(self.request(method, uri, uid, Some(body.to_string())).await).await
    }

    /// POST with the shared webhook secret.
    pub async fn webhook(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(WEBHOOK_SECRET_HEADER, WEBHOOK_SECRET)
            .body(Body::from(body.to_string()))
            .unwrap();
        into_parts(self.oneshot(request).await).await
    }
}

async fn into_parts(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
