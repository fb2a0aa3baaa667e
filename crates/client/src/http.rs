//! Authorized access to the backend API.
//!
//! [`AuthorizingClient`] attaches the session's access token right before
//! each dispatch and resolves 401 responses through the session's
//! single-flight refresh, retrying the original request at most once.

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, ClientResult};
use crate::session::AuthSession;

/// Correlation header sent with every backend request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build a request with a fresh correlation id.
pub(crate) fn request(
    http: &reqwest::Client,
    method: Method,
    url: &str,
) -> (RequestBuilder, String) {
    let request_id = uuid::Uuid::new_v4().to_string();
    let builder = http
        .request(method, url)
        .header(REQUEST_ID_HEADER, &request_id);
    (builder, request_id)
}

/// Send a request and log its outcome.
pub(crate) async fn dispatch(
    builder: RequestBuilder,
    method: &Method,
    path: &str,
    request_id: &str,
) -> ClientResult<Response> {
    match builder.send().await {
        Ok(response) => {
            tracing::debug!(
                %method,
                path,
                status = response.status().as_u16(),
                request_id,
                "Backend request completed",
            );
            Ok(response)
        }
        Err(e) => {
            tracing::debug!(%method, path, request_id, error = %e, "Backend request failed");
            Err(e.into())
        }
    }
}

/// Return the response unchanged on success, or the classified error.
pub(crate) async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ClientError::from_status(status, &body))
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

/// Assert a success status, discarding the body.
pub(crate) async fn check_status(response: Response) -> ClientResult<()> {
    ensure_success(response).await?;
    Ok(())
}

/// Outbound client for every privileged backend call.
///
/// Holds no credential state; tokens are read from the [`AuthSession`] on
/// each dispatch.
#[derive(Clone)]
pub struct AuthorizingClient {
    session: AuthSession,
}

impl AuthorizingClient {
    pub fn new(session: AuthSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Send a request through the refresh protocol.
    ///
    /// `build` decorates the bare request (body, query, form). It may run
    /// twice, so it must rebuild any non-cloneable body on each call. The
    /// returned response may still carry a non-success status other than 401.
    pub async fn send<F>(&self, method: Method, path: &str, build: F) -> ClientResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let (response, sent_token) = self.send_once(&method, path, &build).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(sent_token) = sent_token else {
            return Err(unauthorized(response).await);
        };

        if !self.session.refresh_after_rejection(&sent_token).await {
            return Err(unauthorized(response).await);
        }

        tracing::debug!(%method, path, "Retrying request with refreshed token");
        let (retry, _) = self.send_once(&method, path, &build).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(unauthorized(retry).await);
        }
        Ok(retry)
    }

    async fn send_once<F>(
        &self,
        method: &Method,
        path: &str,
        build: &F,
    ) -> ClientResult<(Response, Option<String>)>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.session.config().url(path);
        let token = self.session.access_token().await;
        let (builder, request_id) = request(self.session.http(), method.clone(), &url);
        let mut builder = build(builder);
        if let Some(token) = &token {
            builder = builder.bearer_auth(token);
        }
        let response = dispatch(builder, method, path, &request_id).await?;
        Ok((response, token))
    }

    // ---- typed helpers ----

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.send(Method::GET, path, |r| r).await?;
        parse_response(response).await
    }

    pub async fn get_json_with_query<T, Q>(&self, path: &str, query: &Q) -> ClientResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let response = self.send(Method::GET, path, |r| r.query(query)).await?;
        parse_response(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::POST, path, |r| r.json(body)).await?;
        parse_response(response).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::PUT, path, |r| r.json(body)).await?;
        parse_response(response).await
    }

    /// `PUT` without a body, ignoring the response body.
    pub async fn put_empty(&self, path: &str) -> ClientResult<()> {
        let response = self.send(Method::PUT, path, |r| r).await?;
        check_status(response).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<()> {
        let response = self.send(Method::DELETE, path, |r| r).await?;
        check_status(response).await
    }

    /// `POST` a multipart form. `form` is called once per attempt.
    pub async fn post_multipart<T, F>(&self, path: &str, form: F) -> ClientResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::multipart::Form,
    {
        let response = self
            .send(Method::POST, path, |r| r.multipart(form()))
            .await?;
        parse_response(response).await
    }

    /// Fetch a binary body as-is.
    pub async fn get_bytes(&self, path: &str) -> ClientResult<Vec<u8>> {
        let response = self.send(Method::GET, path, |r| r).await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

async fn unauthorized(response: Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ClientError::from_status(status, &body)
}
