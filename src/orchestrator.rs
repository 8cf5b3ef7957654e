// Request orchestrator (C11): per-request glue from an authenticated user
// to a finished Anthropic SSE response. Owns the allocate -> dispatch ->
// account-for-outcome sequence and the one-retry-on-bad-auth policy.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;

const BUFFERED_PING_INTERVAL_SECS: u64 = 25;

use crate::allocator::{self, Allocation};
use crate::auth::AuthCache;
use crate::config::Config;
use crate::converters::anthropic_to_kiro::build_kiro_payload;
use crate::crypto::Crypto;
use crate::dispatcher;
use crate::error::{AuthFailureKind, GatewayError, Result};
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::store::Store;
use crate::streaming;

pub struct Orchestrator {
    store: Arc<Store>,
    auth_cache: Arc<AuthCache>,
    crypto: Arc<Crypto>,
    http: Client,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, auth_cache: Arc<AuthCache>, crypto: Arc<Crypto>, http: Client, config: Arc<Config>) -> Self {
        Self {
            store,
            auth_cache,
            crypto,
            http,
            config,
        }
    }

    /// Streaming entry point for `/v1/messages` and `/cc/v1/messages`.
    /// Allocates a credential, dispatches, and records the outcome. On a
    /// classified-bad Kiro auth failure, marks the token invalid and
    /// re-allocates once before giving up.
    pub async fn stream(
        &self,
        user_id: i64,
        request: &AnthropicMessagesRequest,
        input_tokens: i32,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let mut last_err = None;
        for attempt in 0..2 {
            let allocation = allocator::get_best_token(&self.store, &self.auth_cache, user_id, &request.model).await?;
            match self.try_stream(&allocation, request, input_tokens).await {
                Ok(stream) => {
                    self.record_success(&allocation).await;
                    return Ok(stream);
                }
                Err(err) => {
                    self.record_failure(&allocation).await;
                    if attempt == 0 && self.should_retry(&allocation, &err).await {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err.unwrap_or(GatewayError::NoCredentialAvailable))
    }

    /// Buffered streaming entry point for `/cc/v1/messages`: captures the
    /// whole upstream response before replaying it as SSE, correcting
    /// `input_tokens` from the upstream's own context-usage report. Emits
    /// `: ping` lines while the capture is in flight so intermediaries don't
    /// close an idle connection.
    pub async fn stream_buffered(
        &self,
        user_id: i64,
        request: &AnthropicMessagesRequest,
        input_tokens_fallback: i32,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let mut last_err = None;
        for attempt in 0..2 {
            let allocation = allocator::get_best_token(&self.store, &self.auth_cache, user_id, &request.model).await?;
            match self.try_stream_buffered(&allocation, request, input_tokens_fallback).await {
                Ok(stream) => {
                    self.record_success(&allocation).await;
                    return Ok(stream);
                }
                Err(err) => {
                    self.record_failure(&allocation).await;
                    if attempt == 0 && self.should_retry(&allocation, &err).await {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err.unwrap_or(GatewayError::NoCredentialAvailable))
    }

    async fn try_stream_buffered(
        &self,
        allocation: &Allocation,
        request: &AnthropicMessagesRequest,
        input_tokens_fallback: i32,
    ) -> Result<BoxStream<'static, Result<String>>> {
        match allocation {
            Allocation::Kiro { manager, .. } => {
                let response = self.send_kiro_request(manager, request).await?;
                let model = request.model.clone();
                let first_token_timeout = self.config.first_token_timeout;
                let capture = streaming::collect_anthropic_buffered_events(response, &model, first_token_timeout, input_tokens_fallback);
                Ok(ping_while_waiting(capture, BUFFERED_PING_INTERVAL_SECS).boxed())
            }
            Allocation::Custom { account } => {
                let body = dispatcher::dispatch(&self.http, &self.crypto, account, request).await?;
                Ok(futures::stream::once(async move { Ok::<String, GatewayError>(body) }).boxed())
            }
        }
    }

    /// Non-streaming entry point: same allocation/retry policy, but returns
    /// a single collected Anthropic message body.
    pub async fn collect(&self, user_id: i64, request: &AnthropicMessagesRequest, input_tokens: i32) -> Result<Value> {
        let mut last_err = None;
        for attempt in 0..2 {
            let allocation = allocator::get_best_token(&self.store, &self.auth_cache, user_id, &request.model).await?;
            match self.try_collect(&allocation, request, input_tokens).await {
                Ok(value) => {
                    self.record_success(&allocation).await;
                    return Ok(value);
                }
                Err(err) => {
                    self.record_failure(&allocation).await;
                    if attempt == 0 && self.should_retry(&allocation, &err).await {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err.unwrap_or(GatewayError::NoCredentialAvailable))
    }

    async fn try_stream(
        &self,
        allocation: &Allocation,
        request: &AnthropicMessagesRequest,
        input_tokens: i32,
    ) -> Result<BoxStream<'static, Result<String>>> {
        match allocation {
            Allocation::Kiro { manager, .. } => {
                let response = self.send_kiro_request(manager, request).await?;
                streaming::stream_kiro_to_anthropic(
                    response,
                    &request.model,
                    self.config.first_token_timeout,
                    input_tokens,
                    None,
                )
                .await
            }
            Allocation::Custom { account } => {
                let body = dispatcher::dispatch(&self.http, &self.crypto, account, request).await?;
                Ok(futures::stream::once(async move { Ok::<String, GatewayError>(body) }).boxed())
            }
        }
    }

    async fn try_collect(&self, allocation: &Allocation, request: &AnthropicMessagesRequest, input_tokens: i32) -> Result<Value> {
        match allocation {
            Allocation::Kiro { manager, .. } => {
                let response = self.send_kiro_request(manager, request).await?;
                streaming::collect_anthropic_response(response, &request.model, self.config.first_token_timeout, input_tokens).await
            }
            Allocation::Custom { account } => {
                let body = dispatcher::dispatch(&self.http, &self.crypto, account, request).await?;
                Ok(Value::String(body))
            }
        }
    }

    async fn send_kiro_request(&self, manager: &Arc<crate::auth::AuthManager>, request: &AnthropicMessagesRequest) -> Result<reqwest::Response> {
        let access_token = manager
            .get_access_token()
            .await
            .map_err(|(classification, message)| GatewayError::RefreshFailed { classification, message })?;
        let region = manager.region().await;
        let profile_arn = manager.profile_arn().await.unwrap_or_default();
        let conversation_id = uuid::Uuid::new_v4().to_string();

        let payload = build_kiro_payload(request, &conversation_id, &profile_arn, &self.config)
            .map_err(|e| GatewayError::ValidationError {
                field: "request".to_string(),
                message: e,
            })?
            .payload;

        let url = format!("https://codewhisperer.{}.amazonaws.com/generateAssistantResponse", region);
        self.http
            .post(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("kiro request failed: {e}")))
    }

    /// Transient upstream failures and first-token timeouts are worth a
    /// second allocation; a bad Kiro credential is additionally flipped to
    /// `invalid` so it drops out of future pools.
    async fn should_retry(&self, allocation: &Allocation, err: &GatewayError) -> bool {
        match err {
            GatewayError::FirstTokenTimeout => true,
            GatewayError::RefreshFailed { classification, .. } => {
                if matches!(classification, AuthFailureKind::Expired | AuthFailureKind::Invalid) {
                    if let Allocation::Kiro { token, .. } = allocation {
                        if let Err(e) = self.store.set_token_status(token.id, crate::store::TokenStatus::Invalid).await {
                            tracing::warn!(token_id = token.id, "orchestrator: failed to flip token status: {:?}", e);
                        }
                    }
                }
                true
            }
            _ => false,
        }
    }

    async fn record_success(&self, allocation: &Allocation) {
        if let Err(e) = self.store.increment_success(allocation.entity_kind(), allocation.entity_id()).await {
            tracing::warn!("orchestrator: failed to record success: {:?}", e);
        }
    }

    async fn record_failure(&self, allocation: &Allocation) {
        if let Err(e) = self.store.increment_fail(allocation.entity_kind(), allocation.entity_id()).await {
            tracing::warn!("orchestrator: failed to record failure: {:?}", e);
        }
    }
}

enum BufferedState {
    Waiting(std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>>> + Send>>, tokio::time::Interval),
    Draining(VecDeque<String>),
}

/// Turns a one-shot "capture everything" future into a stream that emits
/// `: ping\n\n` on `interval_secs` while the future is still pending, then
/// drains its resulting events one at a time once it resolves.
fn ping_while_waiting(
    capture: impl std::future::Future<Output = Result<Vec<String>>> + Send + 'static,
    interval_secs: u64,
) -> BoxStream<'static, Result<String>> {
    let period = Duration::from_secs(interval_secs);
    let ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let state = BufferedState::Waiting(Box::pin(capture), ticker);

    futures::stream::unfold(state, |state| async move {
        match state {
            BufferedState::Draining(mut queue) => {
                let next = queue.pop_front()?;
                Some((Ok(next), BufferedState::Draining(queue)))
            }
            BufferedState::Waiting(mut fut, mut ticker) => {
                tokio::select! {
                    result = &mut fut => {
                        match result {
                            Ok(mut events) => {
                                if events.is_empty() {
                                    return None;
                                }
                                let first = events.remove(0);
                                Some((Ok(first), BufferedState::Draining(events.into())))
                            }
                            Err(err) => Some((Err(err), BufferedState::Draining(VecDeque::new()))),
                        }
                    }
                    _ = ticker.tick() => {
                        Some((Ok(": ping\n\n".to_string()), BufferedState::Waiting(fut, ticker)))
                    }
                }
            }
        }
    })
    .boxed()
}

