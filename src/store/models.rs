// Persisted entity types for the store
//
// Mirrors the data model: users are surfaced only because tokens and
// custom accounts reference them; the user-account/login subsystem itself
// is out of scope here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    Active,
    Pending,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => UserStatus::Active,
            _ => UserStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub credential_identifier: String,
    pub password_digest: String,
    pub api_key_hash: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KiroAuthType {
    Social,
    Idc,
}

impl KiroAuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KiroAuthType::Social => "social",
            KiroAuthType::Idc => "idc",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "idc" => KiroAuthType::Idc,
            _ => KiroAuthType::Social,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "public" => Visibility::Public,
            _ => Visibility::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
    Active,
    Invalid,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Invalid => "invalid",
            TokenStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "invalid" => TokenStatus::Invalid,
            "expired" => TokenStatus::Expired,
            _ => TokenStatus::Active,
        }
    }
}

/// A stored Kiro credential. `refresh_token`/`client_id`/`client_secret` are
/// ciphertext columns; decrypt via [`crate::store::Store::get_token_credentials`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiroToken {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub refresh_token_ciphertext: String,
    pub auth_type: KiroAuthType,
    pub client_id_ciphertext: Option<String>,
    pub client_secret_ciphertext: Option<String>,
    pub region: String,
    pub visibility: Visibility,
    pub status: TokenStatus,
    pub opus_enabled: bool,
    pub success_count: i64,
    pub fail_count: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Decrypted bundle handed to the auth layer; never persisted.
#[derive(Debug, Clone)]
pub struct TokenCredentials {
    pub refresh_token: String,
    pub auth_type: KiroAuthType,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomAccountFormat {
    Openai,
    Claude,
}

impl CustomAccountFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomAccountFormat::Openai => "openai",
            CustomAccountFormat::Claude => "claude",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(CustomAccountFormat::Openai),
            "claude" => Some(CustomAccountFormat::Claude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomAccountStatus {
    Active,
    Disabled,
}

impl CustomAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomAccountStatus::Active => "active",
            CustomAccountStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "disabled" => CustomAccountStatus::Disabled,
            _ => CustomAccountStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomAccount {
    pub id: i64,
    pub user_id: i64,
    pub name: Option<String>,
    pub api_base: String,
    pub api_key_ciphertext: String,
    pub format: CustomAccountFormat,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub status: CustomAccountStatus,
    pub success_count: i64,
    pub fail_count: i64,
    pub created_at: DateTime<Utc>,
}

impl CustomAccount {
    /// `model_matches`: splits the comma-separated `model` field, trims each
    /// element, tests exact membership. Empty/NULL matches nothing.
    pub fn model_matches(&self, requested_model: &str) -> bool {
        match &self.model {
            None => false,
            Some(list) => list
                .split(',')
                .map(|s| s.trim())
                .any(|m| !m.is_empty() && m == requested_model),
        }
    }
}

/// Patch for `update_custom_account`: only keys the caller supplied are
/// applied. An empty `api_key` means "retain existing ciphertext".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomAccountPatch {
    pub name: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub format: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub status: Option<String>,
}
