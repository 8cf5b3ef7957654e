// Anthropic -> OpenAI request converter
//
// Used by the custom-API dispatcher when a user's custom account talks
// `format=openai` (a third-party OpenAI-compatible endpoint, not Kiro).
// Unlike the Kiro-bound converters this never touches the "unified"
// intermediate format: Anthropic's wire shape and OpenAI's chat-completions
// shape are close enough that a direct translation is simpler and easier to
// audit.

use serde_json::Value;
use tracing::warn;

use crate::models::anthropic::{AnthropicMessagesRequest, ContentBlock, ImageSource};
use crate::models::openai::{ChatCompletionRequest, ChatMessage, FunctionCall, Tool, ToolCall, ToolFunction};

const DEFAULT_THINKING_BUDGET: i32 = 200_000;

/// Converts an Anthropic Messages request into an OpenAI chat-completions
/// request bound for a custom third-party endpoint.
pub fn convert_anthropic_to_openai_request(request: &AnthropicMessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = build_system_message(request) {
        messages.push(system);
    }

    for message in &request.messages {
        messages.extend(convert_message(message));
    }

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        n: None,
        max_tokens: Some(request.max_tokens),
        max_completion_tokens: None,
        stop: request.stop_sequences.clone().map(Value::from),
        presence_penalty: None,
        frequency_penalty: None,
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| Tool {
                    tool_type: "function".to_string(),
                    function: ToolFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: Some(t.input_schema.clone()),
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.clone(),
        stream_options: None,
        logit_bias: None,
        logprobs: None,
        top_logprobs: None,
        user: None,
        seed: None,
        parallel_tool_calls: None,
    }
}

/// Flattens the Anthropic `system` field (string or content-block array) and,
/// when the caller asked for extended thinking, prepends the XML control
/// tags the destination model is expected to honor.
fn build_system_message(request: &AnthropicMessagesRequest) -> Option<ChatMessage> {
    let mut text = match &request.system {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };

    if let Some(thinking) = &request.thinking {
        if thinking.config_type == "enabled" {
            let budget = thinking.budget_tokens.unwrap_or(DEFAULT_THINKING_BUDGET);
            let tags = format!(
                "<thinking_mode>enabled</thinking_mode><max_thinking_length>{}</max_thinking_length>",
                budget
            );
            text = if text.is_empty() {
                tags
            } else {
                format!("{}\n\n{}", tags, text)
            };
        }
    }

    if text.is_empty() {
        return None;
    }

    Some(ChatMessage {
        role: "system".to_string(),
        content: Some(Value::String(text)),
        name: None,
        tool_calls: None,
        tool_call_id: None,
    })
}

/// One Anthropic message can expand into several OpenAI messages: a
/// `tool_result` block becomes its own `role=tool` message, so an assistant
/// turn mixing text and tool calls and a user turn mixing text and tool
/// results both need splitting.
fn convert_message(message: &crate::models::anthropic::AnthropicMessage) -> Vec<ChatMessage> {
    if let Value::String(text) = &message.content {
        return vec![ChatMessage {
            role: message.role.clone(),
            content: Some(Value::String(text.clone())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }];
    }

    let blocks: Vec<ContentBlock> = match serde_json::from_value(message.content.clone()) {
        Ok(blocks) => blocks,
        Err(_) => {
            warn!("unrecognized Anthropic message content shape, dropping message");
            return Vec::new();
        }
    };

    let mut text_parts = Vec::new();
    let mut image_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in &blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::Thinking { .. } => {}
            ContentBlock::Image { source } => {
                if let Some(url) = image_source_to_url(source) {
                    image_parts.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": { "url": url }
                    }));
                }
            }
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                tool_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => tool_results.push((tool_use_id.clone(), flatten_tool_result(content.as_ref()))),
        }
    }

    let mut out = Vec::new();

    if !text_parts.is_empty() || !image_parts.is_empty() {
        let content = if image_parts.is_empty() {
            Value::String(text_parts.join(""))
        } else {
            let mut parts = image_parts;
            if !text_parts.is_empty() {
                parts.insert(0, serde_json::json!({ "type": "text", "text": text_parts.join("") }));
            }
            Value::Array(parts)
        };
        out.push(ChatMessage {
            role: message.role.clone(),
            content: Some(content),
            name: None,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls.clone()) },
            tool_call_id: None,
        });
    } else if !tool_calls.is_empty() {
        out.push(ChatMessage {
            role: message.role.clone(),
            content: None,
            name: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        });
    }

    for (tool_use_id, text) in tool_results {
        out.push(ChatMessage {
            role: "tool".to_string(),
            content: Some(Value::String(text)),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_use_id),
        });
    }

    out
}

fn image_source_to_url(source: &ImageSource) -> Option<String> {
    match source {
        ImageSource::Base64 { media_type, data } => {
            Some(format!("data:{};base64,{}", media_type, data))
        }
        ImageSource::Url { url } => Some(url.clone()),
    }
}

fn flatten_tool_result(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::anthropic::{AnthropicMessage, ThinkingConfig};

    fn base_request(content: Value) -> AnthropicMessagesRequest {
        AnthropicMessagesRequest {
            model: "claude-sonnet-4.5".to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens: 1024,
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

    #[test]
    fn plain_string_content_passes_through() {
        let req = base_request(Value::String("hello".to_string()));
        let out = convert_anthropic_to_openai_request(&req);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, "user");
        assert_eq!(out.messages[0].content, Some(Value::String("hello".to_string())));
    }

    #[test]
    fn thinking_config_prepends_control_tags() {
        let mut req = base_request(Value::String("hi".to_string()));
        req.system = Some(Value::String("be nice".to_string()));
        req.thinking = Some(ThinkingConfig {
            config_type: "enabled".to_string(),
            budget_tokens: Some(4096),
        });
        let out = convert_anthropic_to_openai_request(&req);
        let system_text = out.messages[0].content.as_ref().unwrap().as_str().unwrap();
        assert!(system_text.contains("<thinking_mode>enabled</thinking_mode>"));
        assert!(system_text.contains("<max_thinking_length>4096</max_thinking_length>"));
        assert!(system_text.contains("be nice"));
    }

    #[test]
    fn tool_result_block_becomes_its_own_tool_message() {
        let content = serde_json::json!([
            { "type": "tool_result", "tool_use_id": "toolu_1", "content": "42" }
        ]);
        let req = base_request(content);
        let out = convert_anthropic_to_openai_request(&req);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, "tool");
        assert_eq!(out.messages[0].tool_call_id, Some("toolu_1".to_string()));
    }

    #[test]
    fn tool_use_block_becomes_assistant_tool_call() {
        let content = serde_json::json!([
            { "type": "tool_use", "id": "toolu_2", "name": "get_weather", "input": {"city": "SF"} }
        ]);
        let mut req = base_request(content);
        req.messages[0].role = "assistant".to_string();
        let out = convert_anthropic_to_openai_request(&req);
        assert_eq!(out.messages.len(), 1);
        let calls = out.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
    }
}
