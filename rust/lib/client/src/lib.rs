//! HTTP client for the remote system of record.
//!
//! Provides a type-safe client for [`Resource`] types. Authentication
//! is handled by pluggable [`TokenSource`] implementations.
//!
//! # Usage
//!
//! ```ignore
//! use yard_client::{ResourceClient, StaticToken};
//!
//! let ts = StaticToken::new("jwt");
//! let client = ResourceClient::<RemotePlatform>::new("http://localhost:8080", Arc::new(ts));
//! let page = client.list(&ListParams::default()).await?;
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use yard_core::{ListParams, ListResult};

// ── Error ───────────────────────────────────────────────────────────

/// Client-side API error.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    /// No route to the remote at all (no server configured, or the
    /// transport reported the host unreachable before a request went out).
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("decode: {0}")]
    Decode(String),
}

impl ApiError {
    /// The remote answered that the addressed record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Server { status: 404, .. })
    }
}

// ── TokenSource ─────────────────────────────────────────────────────

/// Pluggable token provider. Called before every API request.
///
/// Returns `Ok(None)` to skip the Authorization header (anonymous).
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync + 'static {
    async fn token(&self) -> Result<Option<String>, ApiError>;
}

/// No authentication: anonymous requests.
pub struct NoAuth;

#[async_trait::async_trait]
impl TokenSource for NoAuth {
    async fn token(&self) -> Result<Option<String>, ApiError> {
        Ok(None)
    }
}

/// Static bearer token (already obtained externally).
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Option<String>, ApiError> {
        Ok(Some(self.0.clone()))
    }
}

// ── Resource ────────────────────────────────────────────────────────

/// A record type addressable over the REST API.
pub trait Resource: DeserializeOwned + Send + Sync + 'static {
    /// Module segment, e.g. `inventory`.
    fn module() -> &'static str;

    /// Collection segment, e.g. `platforms`.
    fn resource_path() -> &'static str;
}

// ── ResourceClient ──────────────────────────────────────────────────

/// Type-safe CRUD client for a single [`Resource`].
///
/// API path is derived from `T::module()` and `T::resource_path()`:
/// `{base_url}/api/{module}/{resource_path}`. Mutations on an existing
/// record carry the owner as an `owner` query parameter.
pub struct ResourceClient<T: Resource> {
    http: reqwest::Client,
    base_url: String,
    token_source: Arc<dyn TokenSource>,
    _phantom: PhantomData<T>,
}

impl<T: Resource> ResourceClient<T> {
    pub fn new(base_url: impl Into<String>, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_source,
            _phantom: PhantomData,
        }
    }

    /// Base URL for this resource: `/api/{module}/{path}`.
    fn collection_url(&self) -> String {
        format!("{}/api/{}/{}", self.base_url, T::module(), T::resource_path())
    }

    /// URL for a single item: `/api/{module}/{path}/{id}`.
    fn item_url(&self, id: &str) -> String {
        format!("{}/{}", self.collection_url(), id)
    }

    /// Build a request with auth header.
    async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ApiError> {
        match self.token_source.token().await? {
            Some(token) => Ok(builder.bearer_auth(token)),
            None => Ok(builder),
        }
    }

    /// Send a request, mapping transport failures that never reached the
    /// server to `Unreachable`.
    async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        builder.send().await.map_err(|e| {
            if e.is_connect() {
                ApiError::Unreachable(e.to_string())
            } else {
                ApiError::Network(e)
            }
        })
    }

    /// Map a non-2xx response to `ApiError::Server`.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Server { status: code, message: body });
        }
        Ok(resp)
    }

    /// Parse an API response, mapping HTTP errors to `ApiError`.
    async fn parse<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, ApiError> {
        let resp = Self::check(resp).await?;
        resp.json::<R>()
            .await
            .map_err(|e| ApiError::Decode(format!("response body: {}", e)))
    }

    /// List one page of records.
    pub async fn list(&self, params: &ListParams) -> Result<ListResult<T>, ApiError> {
        let req = self
            .http
            .get(self.collection_url())
            .query(&[("limit", params.limit), ("offset", params.offset)]);
        let req = self.authed(req).await?;
        Self::parse(Self::send(req).await?).await
    }

    /// Get a record by ID.
    pub async fn get(&self, id: &str) -> Result<T, ApiError> {
        let req = self.http.get(self.item_url(id));
        let req = self.authed(req).await?;
        Self::parse(Self::send(req).await?).await
    }

    /// Create a new record. The server assigns the canonical identifiers.
    pub async fn create<B: Serialize + ?Sized + Sync>(&self, body: &B) -> Result<T, ApiError> {
        debug!(url = %self.collection_url(), "remote create");
        let req = self.http.post(self.collection_url()).json(body);
        let req = self.authed(req).await?;
        Self::parse(Self::send(req).await?).await
    }

    /// Apply a partial update to an existing record owned by `owner`.
    pub async fn update<B: Serialize + ?Sized + Sync>(
        &self,
        id: &str,
        owner: &str,
        patch: &B,
    ) -> Result<T, ApiError> {
        debug!(id, owner, "remote update");
        let req = self
            .http
            .patch(self.item_url(id))
            .query(&[("owner", owner)])
            .json(patch);
        let req = self.authed(req).await?;
        Self::parse(Self::send(req).await?).await
    }

    /// Delete a record owned by `owner`.
    pub async fn delete(&self, id: &str, owner: &str) -> Result<(), ApiError> {
        debug!(id, owner, "remote delete");
        let req = self.http.delete(self.item_url(id)).query(&[("owner", owner)]);
        let req = self.authed(req).await?;
        Self::check(Self::send(req).await?).await?;
        Ok(())
    }
}
