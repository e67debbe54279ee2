//! Strategy version ownership checks applied before job submission.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::OrchestratorError;

/// Resolves whether a strategy version exists and who owns it.
#[async_trait]
pub trait VersionDirectory: Send + Sync {
    /// Verify that `version_id` names a version owned by `owner_id`.
    async fn assert_ownership(
        &self,
        owner_id: &str,
        version_id: &str,
    ) -> Result<(), OrchestratorError>;
}

/// In-process version directory backed by a seedable map.
///
/// Seeded entries are authoritative in both modes. For versions nobody
/// seeded, permissive mode lets the submission through while strict mode
/// rejects it as unknown.
#[derive(Debug, Default)]
pub struct InMemoryVersionDirectory {
    owners: RwLock<HashMap<String, String>>,
    strict: bool,
}

impl InMemoryVersionDirectory {
    /// Directory that accepts versions it has never seen.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Directory that rejects versions it has never seen.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            strict: true,
        }
    }

    /// Register `version_id` as belonging to `owner_id`.
    pub async fn seed(&self, version_id: impl Into<String>, owner_id: impl Into<String>) {
        let mut owners = self.owners.write().await;
        owners.insert(version_id.into(), owner_id.into());
    }
}

#[async_trait]
impl VersionDirectory for InMemoryVersionDirectory {
    async fn assert_ownership(
        &self,
        owner_id: &str,
        version_id: &str,
    ) -> Result<(), OrchestratorError> {
        if version_id.trim().is_empty() {
            return Err(OrchestratorError::param_invalid("versionId is required"));
        }
        let owners = self.owners.read().await;
        match owners.get(version_id) {
            Some(seeded) if seeded == owner_id => Ok(()),
            Some(_) => Err(OrchestratorError::forbidden(
                "version does not belong to current owner",
            )
            .with_details(json!({ "versionId": version_id }))),
            None if self.strict => Err(OrchestratorError::not_found(
                "strategy version not found",
            )
            .with_details(json!({ "versionId": version_id }))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn permissive_directory_accepts_unseeded_versions() {
        let directory = InMemoryVersionDirectory::permissive();
        assert!(directory.assert_ownership("owner-1", "v-1").await.is_ok());
    }

    #[tokio::test]
    async fn empty_version_id_is_rejected() {
        let directory = InMemoryVersionDirectory::permissive();
        let err = directory
            .assert_ownership("owner-1", "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParamInvalid);
        assert_eq!(err.message(), "versionId is required");
    }

    #[tokio::test]
    async fn seeded_version_is_owner_scoped() {
        let directory = InMemoryVersionDirectory::permissive();
        directory.seed("v-1", "owner-1").await;
        assert!(directory.assert_ownership("owner-1", "v-1").await.is_ok());

        let err = directory
            .assert_ownership("owner-2", "v-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert_eq!(err.details(), Some(&json!({"versionId": "v-1"})));
    }

    #[tokio::test]
    async fn strict_directory_rejects_unknown_versions() {
        let directory = InMemoryVersionDirectory::strict();
        directory.seed("v-1", "owner-1").await;
        let err = directory
            .assert_ownership("owner-1", "v-2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.message(), "strategy version not found");
    }
}
