// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Refresh-token exchange protocol, selected by presence of OAuth2 client
/// credentials: both `client_id` and `client_secret` present -> IDC,
/// otherwise Social.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDialect {
    /// `https://prod.{region}.auth.desktop.kiro.dev/refreshToken`
    Social,
    /// `https://oidc.{region}.amazonaws.com/token` (AWS SSO OIDC)
    Idc,
}

/// What an AuthManager is constructed from.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub refresh_token: String,
    pub region: String,
    pub profile_arn: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Credentials {
    pub fn dialect(&self) -> AuthDialect {
        if self.client_id.is_some() && self.client_secret.is_some() {
            AuthDialect::Idc
        } else {
            AuthDialect::Social
        }
    }
}

/// Live access token plus its expiry, cached in-memory only.
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub profile_arn: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroRefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroRefreshResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub profile_arn: Option<String>,
}

#[derive(Deserialize)]
pub struct IdcOidcResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}
