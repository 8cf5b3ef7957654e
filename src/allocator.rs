// Allocator (C8): per-request credential selection across the Kiro and
// custom-account pools, honoring the Pro+ model tier.

use std::sync::Arc;

use rand::Rng;

use crate::auth::{AuthCache, AuthManager, Credentials};
use crate::error::{GatewayError, Result};
use crate::resolver::is_pro_plus_model;
use crate::store::{CustomAccount, KiroToken, Store};

/// One allocated credential, already wired to an `AuthManager` in the Kiro
/// case since the caller needs a live access token immediately.
pub enum Allocation {
    Kiro {
        token: KiroToken,
        manager: Arc<AuthManager>,
    },
    Custom {
        account: CustomAccount,
    },
}

impl Allocation {
    pub fn entity_id(&self) -> i64 {
        match self {
            Allocation::Kiro { token, .. } => token.id,
            Allocation::Custom { account } => account.id,
        }
    }

    pub fn entity_kind(&self) -> crate::store::EntityKind {
        match self {
            Allocation::Kiro { .. } => crate::store::EntityKind::KiroToken,
            Allocation::Custom { .. } => crate::store::EntityKind::CustomAccount,
        }
    }
}

enum Candidate<'a> {
    Kiro(&'a KiroToken),
    Custom(&'a CustomAccount),
}

/// Selects a credential for `user_id`/`requested_model` from the union of
/// that user's active Kiro tokens and active custom accounts.
pub async fn get_best_token(
    store: &Store,
    auth_cache: &AuthCache,
    user_id: i64,
    requested_model: &str,
) -> Result<Allocation> {
    let kiro_tokens = store
        .get_active_kiro_tokens_by_user(user_id)
        .await
        .map_err(GatewayError::Internal)?;
    let custom_accounts = store
        .get_active_custom_accounts_by_user(user_id)
        .await
        .map_err(GatewayError::Internal)?;

    if kiro_tokens.is_empty() && custom_accounts.is_empty() {
        tracing::warn!(user_id, "allocator: empty candidate pool");
        return Err(GatewayError::NoCredentialAvailable);
    }

    let chosen = if is_pro_plus_model(requested_model) {
        let kiro_plus: Vec<&KiroToken> = kiro_tokens.iter().filter(|t| t.opus_enabled).collect();
        let custom_plus: Vec<&CustomAccount> = custom_accounts
            .iter()
            .filter(|a| a.model_matches(requested_model))
            .collect();

        tracing::info!(
            user_id,
            requested_model,
            kiro_plus = kiro_plus.len(),
            custom_plus = custom_plus.len(),
            "allocator: pro+ branch"
        );

        if kiro_plus.is_empty() && custom_plus.is_empty() {
            tracing::info!(user_id, "allocator: pro+ pool empty, falling back to full pool");
            pick_uniform(&kiro_tokens, &custom_accounts)
        } else {
            pick_pro_plus(&kiro_plus, &custom_plus)
        }
    } else {
        tracing::info!(
            user_id,
            requested_model,
            kiro = kiro_tokens.len(),
            custom = custom_accounts.len(),
            "allocator: non-pro+ branch"
        );
        pick_uniform(&kiro_tokens, &custom_accounts)
    };

    match chosen {
        Candidate::Kiro(token) => {
            tracing::info!(user_id, token_id = token.id, "allocator: chose kiro token");
            let creds = store
                .get_token_credentials(token.id)
                .await
                .map_err(GatewayError::Internal)?
                .ok_or(GatewayError::NoCredentialAvailable)?;
            let manager = auth_cache.get_or_create(
                &token.token_hash,
                Credentials {
                    refresh_token: creds.refresh_token,
                    region: creds.region,
                    profile_arn: None,
                    client_id: creds.client_id,
                    client_secret: creds.client_secret,
                },
            );
            Ok(Allocation::Kiro {
                token: token.clone(),
                manager,
            })
        }
        Candidate::Custom(account) => {
            tracing::info!(
                user_id,
                account_id = account.id,
                "allocator: chose custom account"
            );
            Ok(Allocation::Custom {
                account: account.clone(),
            })
        }
    }
}

/// Weighted draw over `kiro`, uniform over `custom`, then the two sub-draws
/// uniformly combine. Both slices are assumed non-empty-or-empty but not
/// both empty (checked by the caller).
fn pick_pro_plus<'a>(kiro: &[&'a KiroToken], custom: &[&'a CustomAccount]) -> Candidate<'a> {
    let draw_from_kiro = match (kiro.is_empty(), custom.is_empty()) {
        (true, false) => false,
        (false, true) => true,
        _ => uniform_bool(),
    };

    if draw_from_kiro {
        Candidate::Kiro(weighted_pick(kiro))
    } else {
        Candidate::Custom(custom[uniform_index(custom.len())])
    }
}

/// Uniform draw across the full union, with no weighting.
fn pick_uniform<'a>(kiro: &'a [KiroToken], custom: &'a [CustomAccount]) -> Candidate<'a> {
    let total = kiro.len() + custom.len();
    let idx = uniform_index(total);
    if idx < kiro.len() {
        Candidate::Kiro(&kiro[idx])
    } else {
        Candidate::Custom(&custom[idx - kiro.len()])
    }
}

/// Weight = `max(1, success_count - fail_count)`.
fn weighted_pick<'a>(tokens: &[&'a KiroToken]) -> &'a KiroToken {
    let weights: Vec<i64> = tokens
        .iter()
        .map(|t| std::cmp::max(1, t.success_count - t.fail_count))
        .collect();
    let total: i64 = weights.iter().sum();
    let mut roll = uniform_index(total.max(1) as usize) as i64;
    for (token, weight) in tokens.iter().zip(weights.iter()) {
        if roll < *weight {
            return token;
        }
        roll -= weight;
    }
    tokens[tokens.len() - 1]
}

fn uniform_bool() -> bool {
    uniform_index(2) == 0
}

/// Uniform `[0, bound)`. `bound == 0` always yields 0 (callers guard against
/// drawing from an empty slice).
fn uniform_index(bound: usize) -> usize {
    if bound == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..bound)
}
