use std::sync::Arc;
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use super::auth_middleware::BearerAuthMiddleware;
use super::session::{CredentialSession, SessionManager};
use super::token_store::TokenStore;

const LOGIN_PATH: &str = "auth/login";
const REGISTER_PATH: &str = "auth/register";

struct GatewayRateLimiter {
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl reqwest_ratelimit::RateLimiter for GatewayRateLimiter {
    async fn acquire_permit(&self) {
        self.rate_limiter.until_ready().await;
    }
}

/// One backend call: verb, path relative to the API base, optional query and
/// JSON body.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Option<String>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Fields that serialize to `None` are left out of the query string.
    pub fn with_query<Q: Serialize>(mut self, query: &Q) -> ApiResult<Self> {
        let encoded = serde_url_params::to_string(query).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.query = (!encoded.is_empty()).then_some(encoded);
        Ok(self)
    }

    pub fn with_json<B: Serialize>(mut self, body: &B) -> ApiResult<Self> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Single point of egress for backend calls.
#[derive(Clone)]
pub struct ApiGateway {
    http: ClientWithMiddleware,
    // Without auth middleware: login/register must not trigger session recovery
    plain: reqwest::Client,
    base_url: Url,
    session: SessionManager,
}

impl ApiGateway {
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> ApiResult<Self> {
        let plain = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let session = SessionManager::new(plain.clone(), config.api_base_url.clone(), store);

        let rate_limiter = GatewayRateLimiter {
            rate_limiter: Arc::new(DefaultDirectRateLimiter::direct(Quota::per_second(
                config.requests_per_second,
            ))),
        };

        // Auth runs first so a replayed request is rate limited too
        let http = ClientBuilder::new(plain.clone())
            .with(BearerAuthMiddleware::new(session.clone()))
            .with(reqwest_ratelimit::all(rate_limiter))
            .build();

        Ok(Self {
            http,
            plain,
            base_url: config.api_base_url.clone(),
            session,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Restores a persisted session, if any.
    pub async fn restore(&self) -> ApiResult<bool> {
        self.session.restore().await
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<()> {
        let response = self
            .plain
            .post(self.url_for(LOGIN_PATH, None)?)
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let response = ensure_success(response).await?;
        let body: LoginResponse = response.json().await.map_err(classify_reqwest_error)?;

        self.session
            .establish(CredentialSession::new(body.access_token, body.refresh_token))
            .await;
        info!("Signed in");
        Ok(())
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> ApiResult<()> {
        let response = self
            .plain
            .post(self.url_for(REGISTER_PATH, None)?)
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn logout(&self) {
        self.session.sign_out().await;
        info!("Signed out");
    }

    /// Sends `request` and decodes the JSON response body.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        let response = self.dispatch(request).await?;
        response.json::<T>().await.map_err(classify_reqwest_error)
    }

    /// Sends `request` and ignores any response body.
    pub async fn send_unit(&self, request: ApiRequest) -> ApiResult<()> {
        self.dispatch(request).await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        self.send(ApiRequest::post(path).with_json(body)?).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        self.send(ApiRequest::put(path).with_json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        self.send_unit(ApiRequest::delete(path)).await
    }

    /// Posts `content` as the `file` field of a multipart form and decodes
    /// the JSON response body.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, file_name: &str, content: &[u8]) -> ApiResult<T> {
        let url = self.url_for(path, None)?;
        let token = self.session.access_token().await;
        let mut response = self.send_form(url.clone(), file_name, content).await?;
        // Streamed bodies are not replayed by the auth middleware, so the
        // single retry after a recovered session happens here
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Upload unauthorized, recovering session");
            self.session.recover(token.as_deref()).await?;
            response = self.send_form(url, file_name, content).await?;
        }
        debug!(status = %response.status(), "Backend responded");
        let response = ensure_success(response).await?;
        response.json::<T>().await.map_err(classify_reqwest_error)
    }

    async fn send_form(&self, url: Url, file_name: &str, content: &[u8]) -> ApiResult<Response> {
        let part = Part::bytes(content.to_vec()).file_name(file_name.to_string());
        self.http
            .post(url)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(classify_middleware_error)
    }

    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn dispatch(&self, request: ApiRequest) -> ApiResult<Response> {
        let url = self.url_for(&request.path, request.query.as_deref())?;
        let mut builder = self.http.request(request.method, url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_middleware_error)?;
        debug!(status = %response.status(), "Backend responded");
        ensure_success(response).await
    }

    fn url_for(&self, path: &str, query: Option<&str>) -> ApiResult<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Transport(format!("invalid request path {path}: {e}")))?;
        url.set_query(query);
        Ok(url)
    }
}

async fn ensure_success(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    // Only a string `detail` is user-facing; validation arrays are not
    let detail = match response.json::<ErrorBody>().await {
        Ok(ErrorBody { detail: Some(serde_json::Value::String(detail)) }) => Some(detail),
        _ => None,
    };
    warn!(status = %status, detail = ?detail, "Backend returned an error");
    Err(ApiError::Remote {
        status: status.as_u16(),
        detail,
    })
}

fn classify_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::NetworkTimeout
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Transport(err.to_string())
    }
}

fn classify_middleware_error(err: reqwest_middleware::Error) -> ApiError {
    match err {
        reqwest_middleware::Error::Reqwest(e) => classify_reqwest_error(e),
        reqwest_middleware::Error::Middleware(e) => match e.downcast::<ApiError>() {
            Ok(api_error) => api_error,
            Err(other) => ApiError::Transport(other.to_string()),
        },
    }
}
