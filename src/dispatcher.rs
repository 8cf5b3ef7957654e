// Custom-API dispatcher (C10): issues third-party requests in openai/claude
// dialect against a user's bound `CustomAccount`, normalizing both success
// and error paths back into the Anthropic SSE grammar.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;

use crate::converters::anthropic_to_openai::convert_anthropic_to_openai_request;
use crate::converters::azure;
use crate::converters::openai_sse_to_anthropic::OpenAiSseToAnthropic;
use crate::crypto::Crypto;
use crate::error::{to_sse_error_event, GatewayError, Result};
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::models::openai::ChatCompletionChunk;
use crate::store::{CustomAccount, CustomAccountFormat};

const RETRY_AFTER_CAP_SECS: u64 = 5;

/// Dispatches one Anthropic-shaped request against a custom account,
/// returning a fully-formed Anthropic SSE body (including `message_stop`).
pub async fn dispatch(
    client: &Client,
    crypto: &Crypto,
    account: &CustomAccount,
    request: &AnthropicMessagesRequest,
) -> Result<String> {
    let api_key = crypto
        .decrypt(&account.api_key_ciphertext)
        .map_err(GatewayError::Internal)?;
    let is_azure = account.provider.as_deref() == Some("azure");

    match account.format {
        CustomAccountFormat::Openai => dispatch_openai(client, account, &api_key, is_azure, request).await,
        CustomAccountFormat::Claude => dispatch_claude(client, account, &api_key, is_azure, request).await,
    }
}

async fn dispatch_openai(
    client: &Client,
    account: &CustomAccount,
    api_key: &str,
    is_azure: bool,
    request: &AnthropicMessagesRequest,
) -> Result<String> {
    let openai_request = convert_anthropic_to_openai_request(request);
    let mut body = serde_json::to_value(&openai_request).map_err(|e| GatewayError::Internal(e.into()))?;
    if is_azure {
        azure::scrub_for_azure(&mut body);
    }

    let url = format!("{}/chat/completions", account.api_base.trim_end_matches('/'));
    let response = send_with_retry(client, &url, api_key, &body).await?;

    let mut translator = OpenAiSseToAnthropic::new();
    let mut out = translator.message_start(&request.model, 0);
    let mut stream = response.bytes_stream();
    let mut buf = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GatewayError::Internal(anyhow::anyhow!("upstream stream error: {e}")))?;
        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buf.find("\n\n") {
            let event = buf[..pos].to_string();
            buf.drain(..pos + 2);
            for line in event.lines() {
                let Some(data) = line.strip_prefix("data: ") else { continue };
                if data.trim() == "[DONE]" {
                    continue;
                }
                match serde_json::from_str::<ChatCompletionChunk>(data) {
                    Ok(parsed) => out.push_str(&translator.translate_chunk(&parsed)),
                    Err(err) => tracing::warn!("dispatcher: failed to parse openai chunk: {err}"),
                }
            }
        }
    }

    out.push_str(&translator.finalize());
    Ok(out)
}

async fn dispatch_claude(
    client: &Client,
    account: &CustomAccount,
    api_key: &str,
    is_azure: bool,
    request: &AnthropicMessagesRequest,
) -> Result<String> {
    let mut body = serde_json::to_value(request).map_err(|e| GatewayError::Internal(e.into()))?;
    if is_azure {
        azure::scrub_for_azure(&mut body);
    }

    let url = format!("{}/v1/messages", account.api_base.trim_end_matches('/'));
    let response = send_with_retry(client, &url, api_key, &body).await?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("upstream read failed: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Sends `body` to `url` with bearer auth. On 429, retries once after
/// `Retry-After` (capped at [`RETRY_AFTER_CAP_SECS`]). Any other 4xx/5xx, or
/// a second 429, is surfaced as a synthetic SSE error via the caller.
async fn send_with_retry(client: &Client, url: &str, api_key: &str, body: &Value) -> Result<reqwest::Response> {
    for attempt in 0..2 {
        let response = client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("custom dispatch request failed: {e}")))?;

        if response.status().is_success() {
            return Ok(response);
        }

        if response.status().as_u16() == 429 && attempt == 0 {
            let wait = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1)
                .min(RETRY_AFTER_CAP_SECS);
            tracing::warn!(wait, "dispatcher: 429 from custom account, retrying once");
            tokio::time::sleep(Duration::from_secs(wait)).await;
            continue;
        }

        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamError {
            http_status: status,
            message,
        });
    }

    unreachable!("loop always returns or retries exactly once")
}

/// Renders a dispatch failure as the synthetic Anthropic SSE error body the
/// orchestrator forwards with HTTP 502 once retries are exhausted.
pub fn to_error_body(err: &GatewayError) -> String {
    to_sse_error_event(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::anthropic::AnthropicMessage;
    use crate::store::CustomAccountStatus;
    use chrono::Utc;

    #[test]
    fn error_body_is_well_formed_sse() {
        let err = GatewayError::UpstreamError {
            http_status: 503,
            message: "overloaded".to_string(),
        };
        let body = to_error_body(&err);
        assert!(body.starts_with("event: error\n"));
        assert!(body.contains("message_stop"));
    }

    fn base_request() -> AnthropicMessagesRequest {
        AnthropicMessagesRequest {
            model: "claude-sonnet-4.5".to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: Value::String("hi".to_string()),
            }],
            max_tokens: 64,
            system: None,
            stream: false,
            thinking: None,
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            metadata: None,
        }
    }

    fn account_for(api_base: String, format: CustomAccountFormat, api_key_ciphertext: String) -> CustomAccount {
        CustomAccount {
            id: 1,
            user_id: 1,
            name: None,
            api_base,
            api_key_ciphertext,
            format,
            provider: None,
            model: None,
            status: CustomAccountStatus::Active,
            success_count: 0,
            fail_count: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_claude_returns_upstream_body_on_success() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"type":"message","content":[]}"#)
            .create_async()
            .await;

        let crypto = Crypto::new("test-key-material", false).unwrap();
        let account = account_for(server.url(), CustomAccountFormat::Claude, crypto.encrypt("sk-upstream").unwrap());

        let body = dispatch(&Client::new(), &crypto, &account, &base_request()).await.unwrap();
        assert!(body.contains("\"type\":\"message\""));
    }

    #[tokio::test]
    async fn dispatch_claude_retries_exactly_once_on_429_before_surfacing_error() {
        // A single mock answering every call with 429 means "the request was
        // sent twice" is observable only if `send_with_retry` actually retries;
        // `.expect(2)` plus `assert_async` verifies that count precisely.
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_header("retry-after", "0")
            .expect(2)
            .create_async()
            .await;

        let crypto = Crypto::new("test-key-material", false).unwrap();
        let account = account_for(server.url(), CustomAccountFormat::Claude, crypto.encrypt("sk-upstream").unwrap());

        let err = dispatch(&Client::new(), &crypto, &account, &base_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamError { http_status: 429, .. }));
        _m.assert_async().await;
    }
}
