//! Shared types used across the codebase

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Labels that can never be claimed as a tenant id
pub const RESERVED_LABELS: &[&str] = &["www"];

const MAX_TENANT_ID_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTenantId {
    #[error("Tenant id must not be empty")]
    Empty,

    #[error("Tenant id must be at most 63 characters")]
    TooLong,

    #[error("Tenant id may only contain lowercase letters, digits and hyphens")]
    InvalidCharacter,

    #[error("Tenant id must not start or end with a hyphen")]
    EdgeHyphen,

    #[error("Tenant id '{0}' is reserved")]
    Reserved(String),
}

/// Globally unique tenant identifier, usable as the first label of a host name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, InvalidTenantId> {
        if raw.is_empty() {
            return Err(InvalidTenantId::Empty);
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(InvalidTenantId::TooLong);
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(InvalidTenantId::InvalidCharacter);
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(InvalidTenantId::EdgeHyphen);
        }
        if RESERVED_LABELS.contains(&raw) {
            return Err(InvalidTenantId::Reserved(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = InvalidTenantId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle status of a tenant in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Provisioning,
    Active,
    Failed,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::Failed => "failed",
            TenantStatus::Suspended => "suspended",
        }
    }

    /// Only active tenants may receive traffic
    pub fn is_routable(&self) -> bool {
        matches!(self, TenantStatus::Active)
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown tenant status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TenantStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(TenantStatus::Provisioning),
            "active" => Ok(TenantStatus::Active),
            "failed" => Ok(TenantStatus::Failed),
            "suspended" => Ok(TenantStatus::Suspended),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A row of the shared tenant directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRecord {
    pub tenant_id: TenantId,
    pub organization_name: String,
    #[serde(serialize_with = "encrypted_secret::serialize", skip_serializing_if = "Option::is_none")]
    pub encrypted_connection_secret: Option<Vec<u8>>,
    pub status: TenantStatus,
    /// External project awaiting a compensating delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphaned_project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn provisioning(tenant_id: TenantId, organization_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            organization_name: organization_name.into(),
            encrypted_connection_secret: None,
            status: TenantStatus::Provisioning,
            orphaned_project_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// Admin output shows the ciphertext as base64, never as a byte array
mod encrypted_secret {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }
}
