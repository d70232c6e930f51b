use http::Extensions;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use tracing::debug;

use crate::error::ApiError;
use super::session::SessionManager;

/// Attaches the current access token and replays a request once after a
/// successful session recovery.
pub(crate) struct BearerAuthMiddleware {
    session: SessionManager,
}

impl BearerAuthMiddleware {
    pub(crate) fn new(session: SessionManager) -> Self {
        Self { session }
    }
}

fn set_bearer(req: &mut Request, token: &str) -> reqwest_middleware::Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| reqwest_middleware::Error::middleware(ApiError::Transport(e.to_string())))?;
    value.set_sensitive(true);
    req.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[async_trait::async_trait]
impl Middleware for BearerAuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let token = self.session.access_token().await;
        // JSON bodies are buffered; multipart uploads stream and are retried by the gateway
        let replay = req.try_clone();
        if let Some(token) = &token {
            set_bearer(&mut req, token)?;
        }

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            debug!(url = %response.url(), "Unauthorized response for a streamed request, not replayed");
            return Ok(response);
        };

        debug!(url = %replay.url(), "Unauthorized, recovering session");
        match self.session.recover(token.as_deref()).await {
            Ok(fresh) => {
                set_bearer(&mut replay, &fresh)?;
                next.run(replay, extensions).await
            }
            Err(e) => Err(reqwest_middleware::Error::middleware(e)),
        }
    }
}
