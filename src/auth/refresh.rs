// Token refresh logic for the two Kiro authentication dialects

use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};

use crate::error::AuthFailureKind;

use super::types::{Credentials, IdcOidcResponse, KiroRefreshRequest, KiroRefreshResponse, TokenData};

fn social_refresh_url(region: &str) -> String {
    if let Ok(base) = std::env::var("KIRO_SOCIAL_REFRESH_URL_OVERRIDE") {
        return base;
    }
    format!("https://prod.{}.auth.desktop.kiro.dev/refreshToken", region)
}

fn idc_refresh_url(region: &str) -> String {
    if let Ok(base) = std::env::var("KIRO_IDC_REFRESH_URL_OVERRIDE") {
        return base;
    }
    format!("https://oidc.{}.amazonaws.com/token", region)
}

fn machine_fingerprint() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Classifies a non-success refresh response: `expired` for a recognized
/// 401 body, `transient` for 5xx, `invalid` otherwise.
pub fn classify_failure(status: StatusCode, body: &str) -> AuthFailureKind {
    if status == StatusCode::UNAUTHORIZED {
        let looks_expired = body.contains("expired")
            || body.contains("invalid_grant")
            || body.contains("Unauthorized");
        if looks_expired {
            return AuthFailureKind::Expired;
        }
        return AuthFailureKind::Invalid;
    }
    if status.is_server_error() {
        return AuthFailureKind::Transient;
    }
    AuthFailureKind::Invalid
}

pub async fn refresh_social(client: &Client, creds: &Credentials) -> Result<TokenData, (AuthFailureKind, String)> {
    tracing::info!("refreshing Kiro token via Social dialect");

    let url = social_refresh_url(&creds.region);
    let fingerprint = machine_fingerprint();
    let body = KiroRefreshRequest {
        refresh_token: creds.refresh_token.clone(),
    };

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("User-Agent", format!("KiroIDE-0.7.45-{}", fingerprint))
        .json(&body)
        .send()
        .await
        .map_err(|e| (AuthFailureKind::Transient, format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err((classify_failure(status, &error_text), error_text));
    }

    let data: KiroRefreshResponse = response
        .json()
        .await
        .map_err(|e| (AuthFailureKind::Invalid, format!("malformed response: {e}")))?;

    if data.access_token.is_empty() {
        return Err((AuthFailureKind::Invalid, "response has no accessToken".to_string()));
    }

    let expires_in = data.expires_in.unwrap_or(3600);
    let expires_at = Utc::now() + Duration::seconds(expires_in as i64 - 60);

    Ok(TokenData {
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        expires_at,
        profile_arn: data.profile_arn,
    })
}

pub async fn refresh_idc(client: &Client, creds: &Credentials) -> Result<TokenData, (AuthFailureKind, String)> {
    tracing::info!("refreshing Kiro token via IDC dialect");

    let client_id = creds
        .client_id
        .as_deref()
        .ok_or_else(|| (AuthFailureKind::Invalid, "missing client_id for IDC dialect".to_string()))?;
    let client_secret = creds
        .client_secret
        .as_deref()
        .ok_or_else(|| (AuthFailureKind::Invalid, "missing client_secret for IDC dialect".to_string()))?;

    let url = idc_refresh_url(&creds.region);
    let form = [
        ("clientId", client_id),
        ("clientSecret", client_secret),
        ("grantType", "refresh_token"),
        ("refreshToken", creds.refresh_token.as_str()),
    ];

    let response = client
        .post(&url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .form(&form)
        .send()
        .await
        .map_err(|e| (AuthFailureKind::Transient, format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), body = %error_text, "IDC refresh failed");
        return Err((classify_failure(status, &error_text), error_text));
    }

    let data: IdcOidcResponse = response
        .json()
        .await
        .map_err(|e| (AuthFailureKind::Invalid, format!("malformed response: {e}")))?;

    if data.access_token.is_empty() {
        return Err((AuthFailureKind::Invalid, "response has no access_token".to_string()));
    }

    let expires_in = data.expires_in.unwrap_or(3600);
    let expires_at = Utc::now() + Duration::seconds(expires_in as i64 - 60);

    Ok(TokenData {
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        expires_at,
        profile_arn: None,
    })
}

pub async fn refresh(
    client: &Client,
    creds: &Credentials,
) -> std::result::Result<TokenData, (AuthFailureKind, String)> {
    match creds.dialect() {
        super::types::AuthDialect::Social => refresh_social(client, creds).await,
        super::types::AuthDialect::Idc => refresh_idc(client, creds).await,
    }
}
