//! Authorization of remote start and stop requests

use crate::config::AuthConfig;
use crate::model::{ChargingStation, TenantId, Transaction};
use crate::CsmsResult;
use async_trait::async_trait;
use dashmap::DashSet;
use ocpp_types::common::{AuthorizationStatus, IdTagInfo};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Admin,
    Basic,
}

/// Identity behind a remote request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Option<String>,
    /// Badges owned by the user
    pub tag_ids: Vec<String>,
    pub role: UserRole,
}

impl UserContext {
    pub fn basic(user_id: impl Into<String>, tag_ids: Vec<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            tag_ids,
            role: UserRole::Basic,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            tag_ids: Vec::new(),
            role: UserRole::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn owns_tag(&self, tag_id: &str) -> bool {
        self.tag_ids.iter().any(|t| t == tag_id)
    }
}

/// External decision point for starting and stopping transactions
#[async_trait]
pub trait AuthorizationOracle: Send + Sync {
    async fn is_authorized_to_start(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        tag_id: &str,
    ) -> CsmsResult<bool>;

    /// Asked only when the requester does not own the transaction
    async fn is_authorized_to_stop(
        &self,
        tenant: &TenantId,
        user: &UserContext,
        transaction: &Transaction,
    ) -> CsmsResult<bool>;
}

/// Oracle backed by a list of accepted tags
pub struct TagListAuthorizer {
    config: AuthConfig,
    tags: DashSet<String>,
}

impl TagListAuthorizer {
    pub fn new(config: AuthConfig) -> Self {
        let tags = DashSet::new();
        for tag in &config.accepted_tags {
            tags.insert(tag.clone());
        }
        Self { config, tags }
    }

    pub fn add_tag(&self, tag_id: impl Into<String>) {
        self.tags.insert(tag_id.into());
    }

    pub fn remove_tag(&self, tag_id: &str) -> bool {
        self.tags.remove(tag_id).is_some()
    }

    /// Authorize ID tag
    pub fn authorize_id_tag(&self, tag_id: &str) -> IdTagInfo {
        if !self.config.enabled || self.tags.contains(tag_id) {
            IdTagInfo::with_status(AuthorizationStatus::Accepted)
        } else {
            IdTagInfo::with_status(AuthorizationStatus::Invalid)
        }
    }
}

#[async_trait]
impl AuthorizationOracle for TagListAuthorizer {
    async fn is_authorized_to_start(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        tag_id: &str,
    ) -> CsmsResult<bool> {
        let info = self.authorize_id_tag(tag_id);
        debug!(
            "Tag {} on {} for tenant {}: {:?}",
            tag_id, station.id, tenant, info.status
        );
        Ok(info.is_accepted())
    }

    async fn is_authorized_to_stop(
        &self,
        _tenant: &TenantId,
        user: &UserContext,
        _transaction: &Transaction,
    ) -> CsmsResult<bool> {
        Ok(!self.config.enabled || (self.config.admin_override && user.is_admin()))
    }
}
