//! The remote system of record, as seen by the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use yard_client::{ApiError, Resource, ResourceClient};
use yard_core::ListParams;

use crate::model::{Identity, Piece, Platform, PlatformStatus};

/// A platform as returned by the remote API. The server owns `id` and
/// `business_number`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlatform {
    pub id: String,
    #[serde(default)]
    pub business_number: String,
    #[serde(default)]
    pub material_types: Vec<String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub reception_date: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub standard_width: f64,
    #[serde(default)]
    pub pieces: Vec<Piece>,
    #[serde(default)]
    pub status: PlatformStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Resource for RemotePlatform {
    fn module() -> &'static str {
        "inventory"
    }

    fn resource_path() -> &'static str {
        "platforms"
    }
}

impl RemotePlatform {
    /// Build a local, synced platform. Derived values are recomputed
    /// locally rather than trusted from the wire.
    pub fn into_platform(self) -> Platform {
        let mut platform = Platform {
            identity: Identity::synced(self.id, self.business_number),
            material_types: self.material_types,
            provider: self.provider,
            driver: self.driver,
            reception_date: self.reception_date,
            notes: self.notes,
            standard_width: self.standard_width,
            pieces: self.pieces,
            total_length: 0.0,
            total_linear_meters: 0.0,
            status: self.status,
            needs_sync: false,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        platform.recompute();
        platform
    }
}

/// Full state of a platform sent on create and update. Identifiers are
/// never sent; the remote assigns them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPayload {
    pub material_types: Vec<String>,
    pub provider: String,
    pub driver: String,
    pub reception_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub standard_width: f64,
    pub pieces: Vec<Piece>,
    pub total_length: f64,
    pub total_linear_meters: f64,
    pub status: PlatformStatus,
}

impl From<&Platform> for PlatformPayload {
    fn from(p: &Platform) -> Self {
        Self {
            material_types: p.material_types.clone(),
            provider: p.provider.clone(),
            driver: p.driver.clone(),
            reception_date: p.reception_date.clone(),
            notes: p.notes.clone(),
            standard_width: p.standard_width,
            pieces: p.pieces.clone(),
            total_length: p.total_length,
            total_linear_meters: p.total_linear_meters,
            status: p.status,
        }
    }
}

/// Remote collaborator operations used by the engine.
#[async_trait]
pub trait PlatformRemote: Send + Sync + 'static {
    /// Create a record. Returns the server-issued identifiers.
    async fn create(&self, payload: &PlatformPayload) -> Result<RemotePlatform, ApiError>;

    /// Update an existing record. Fails with a 404 when `id` is unknown.
    async fn update(
        &self,
        id: &str,
        owner: &str,
        payload: &PlatformPayload,
    ) -> Result<RemotePlatform, ApiError>;

    async fn delete(&self, id: &str, owner: &str) -> Result<(), ApiError>;

    /// One page of the remote list.
    async fn list(&self, params: &ListParams) -> Result<Vec<RemotePlatform>, ApiError>;
}

#[async_trait]
impl PlatformRemote for ResourceClient<RemotePlatform> {
    async fn create(&self, payload: &PlatformPayload) -> Result<RemotePlatform, ApiError> {
        ResourceClient::create(self, payload).await
    }

    async fn update(
        &self,
        id: &str,
        owner: &str,
        payload: &PlatformPayload,
    ) -> Result<RemotePlatform, ApiError> {
        ResourceClient::update(self, id, owner, payload).await
    }

    async fn delete(&self, id: &str, owner: &str) -> Result<(), ApiError> {
        ResourceClient::delete(self, id, owner).await
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<RemotePlatform>, ApiError> {
        Ok(ResourceClient::list(self, params).await?.items)
    }
}

/// Stand-in when no server is configured. Every call is unreachable, so
/// everything stays local and flagged.
pub struct NoRemote;

#[async_trait]
impl PlatformRemote for NoRemote {
    async fn create(&self, _payload: &PlatformPayload) -> Result<RemotePlatform, ApiError> {
        Err(ApiError::Unreachable("no server configured".into()))
    }

    async fn update(&self, _id: &str, _owner: &str, _payload: &PlatformPayload) -> Result<RemotePlatform, ApiError> {
        Err(ApiError::Unreachable("no server configured".into()))
    }

    async fn delete(&self, _id: &str, _owner: &str) -> Result<(), ApiError> {
        Err(ApiError::Unreachable("no server configured".into()))
    }

    async fn list(&self, _params: &ListParams) -> Result<Vec<RemotePlatform>, ApiError> {
        Err(ApiError::Unreachable("no server configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::platform;

    #[test]
    fn payload_carries_no_identifiers() {
        let p = platform("local-1", &[2.0]);
        let json = serde_json::to_value(PlatformPayload::from(&p)).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("businessNumber").is_none());
        assert!(json.get("identity").is_none());
        assert_eq!(json["pieces"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn remote_record_becomes_synced_platform() {
        let remote: RemotePlatform = serde_json::from_value(serde_json::json!({
            "id": "srv-9",
            "businessNumber": "P-0009",
            "standardWidth": 0.5,
            "pieces": [{"id": "x", "sequenceNumber": 1, "length": 2.0, "standardWidth": 0.5, "linearMeters": 99.0}],
            "status": "COMPLETED"
        }))
        .unwrap();

        let p = remote.into_platform();
        assert_eq!(p.id(), "srv-9");
        assert!(!p.identity.is_provisional());
        assert!(!p.needs_sync);
        assert_eq!(p.status, PlatformStatus::Completed);
        assert_eq!(p.pieces[0].linear_meters, 1.0);
        assert_eq!(p.total_linear_meters, 1.0);
    }

    #[tokio::test]
    async fn no_remote_is_unreachable() {
        let err = NoRemote.list(&ListParams::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::Unreachable(_)));
    }
}
