// Health checker (C7): periodic liveness probe over every active Kiro
// token, independent of request handling.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthCache;
use crate::error::AuthFailureKind;
use crate::oauth_state::OAuthStateRegistry;
use crate::store::{Store, TokenStatus};

/// Runs forever, checking every active Kiro token's refresh path once per
/// `interval_secs` and sweeping expired OAuth states on the same cadence.
/// Must never block request handling: each probe gets its own short timeout
/// and the store is only touched long enough to read the candidate list and
/// record an outcome.
pub async fn run(store: Arc<Store>, auth_cache: Arc<AuthCache>, oauth_states: Arc<OAuthStateRegistry>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        oauth_states.sweep_expired();
        if let Err(err) = check_all(&store, &auth_cache).await {
            tracing::error!("health checker: failed to list active tokens: {:?}", err);
        }
    }
}

async fn check_all(store: &Store, auth_cache: &AuthCache) -> anyhow::Result<()> {
    let tokens = store.admin_get_all_active_kiro_tokens().await?;
    tracing::debug!(count = tokens.len(), "health checker: probing active tokens");

    for token in tokens {
        let Some(creds) = store.get_token_credentials(token.id).await? else {
            continue;
        };
        let manager = auth_cache.get_or_create(
            &token.token_hash,
            crate::auth::Credentials {
                refresh_token: creds.refresh_token,
                region: creds.region,
                profile_arn: None,
                client_id: creds.client_id,
                client_secret: creds.client_secret,
            },
        );

        let outcome = tokio::time::timeout(Duration::from_secs(10), manager.get_access_token()).await;

        match outcome {
            Ok(Ok(_)) => {
                if let Err(err) = store.record_health_check(token.id, true, "ok").await {
                    tracing::warn!(token_id = token.id, "health checker: failed to record success: {:?}", err);
                }
            }
            Ok(Err((AuthFailureKind::Expired, msg))) | Ok(Err((AuthFailureKind::Invalid, msg))) => {
                tracing::warn!(token_id = token.id, reason = %msg, "health checker: token is no longer usable");
                if let Err(err) = store.set_token_status(token.id, TokenStatus::Invalid).await {
                    tracing::warn!(token_id = token.id, "health checker: failed to flip status: {:?}", err);
                }
                let _ = store.record_health_check(token.id, false, &msg).await;
            }
            Ok(Err((AuthFailureKind::Transient, msg))) => {
                tracing::warn!(token_id = token.id, reason = %msg, "health checker: transient refresh failure");
                let _ = store.record_health_check(token.id, false, &msg).await;
            }
            Err(_) => {
                tracing::warn!(token_id = token.id, "health checker: probe timed out");
                let _ = store.record_health_check(token.id, false, "timeout").await;
            }
        }
    }

    Ok(())
}
