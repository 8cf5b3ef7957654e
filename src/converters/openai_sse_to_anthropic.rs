// OpenAI SSE -> Anthropic SSE response converter
//
// Used by the custom-API dispatcher to present a third-party
// OpenAI-compatible stream as an Anthropic Messages stream. Structured as a
// stateful translator rather than a stream combinator (unlike
// `streaming::stream_kiro_to_anthropic`) because the dispatcher already owns
// SSE line-splitting for the upstream connection and just hands over one
// parsed chunk at a time.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::openai::{ChatCompletionChunk, ChatCompletionUsage};

fn format_event(event_type: &str, data: &Value) -> String {
    format!(
        "event: {}\ndata: {}\n\n",
        event_type,
        serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string())
    )
}

fn generate_message_id() -> String {
    format!("msg_{}", &Uuid::new_v4().simple().to_string()[..24])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    Thinking,
    Tool(i32),
}

struct OpenToolCall {
    openai_index: i32,
    block_index: i32,
}

/// Reassembles an Anthropic message lifecycle out of OpenAI
/// `chat.completion.chunk` deltas. One instance handles exactly one request.
pub struct OpenAiSseToAnthropic {
    open: OpenBlock,
    next_index: i32,
    tool_calls: Vec<OpenToolCall>,
    finish_reason: Option<String>,
    usage: Option<ChatCompletionUsage>,
}

impl OpenAiSseToAnthropic {
    pub fn new() -> Self {
        Self {
            open: OpenBlock::None,
            next_index: 0,
            tool_calls: Vec::new(),
            finish_reason: None,
            usage: None,
        }
    }

    pub fn message_start(&self, model: &str, input_tokens: i32) -> String {
        let message = json!({
            "id": generate_message_id(),
            "type": "message",
            "role": "assistant",
            "content": [],
            "model": model,
            "stop_reason": null,
            "stop_sequence": null,
            "usage": { "input_tokens": input_tokens, "output_tokens": 0 }
        });
        format_event("message_start", &json!({ "type": "message_start", "message": message }))
    }

    /// Translates one upstream chunk into zero or more Anthropic SSE events.
    pub fn translate_chunk(&mut self, chunk: &ChatCompletionChunk) -> String {
        let mut out = String::new();
        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(text) = &choice.delta.content {
            if !text.is_empty() {
                out.push_str(&self.ensure_block_open(OpenBlock::Text, "text", "text"));
                out.push_str(&self.delta_event("text_delta", "text", text));
            }
        }

        if let Some(reasoning) = &choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                out.push_str(&self.ensure_block_open(OpenBlock::Thinking, "thinking", "thinking"));
                out.push_str(&self.delta_event("thinking_delta", "thinking", reasoning));
            }
        }

        if let Some(deltas) = &choice.delta.tool_calls {
            for d in deltas {
                out.push_str(&self.handle_tool_call_delta(d));
            }
        }

        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        out
    }

    fn handle_tool_call_delta(&mut self, delta: &crate::models::openai::ToolCallDelta) -> String {
        let mut out = String::new();

        let block_index = match self.tool_calls.iter().find(|t| t.openai_index == delta.index) {
            Some(t) => t.block_index,
            None => {
                out.push_str(&self.close_current_block());
                let id = delta.id.clone().unwrap_or_default();
                let name = delta
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                let block_index = self.next_index;
                self.next_index += 1;
                self.tool_calls.push(OpenToolCall {
                    openai_index: delta.index,
                    block_index,
                });
                self.open = OpenBlock::Tool(block_index);
                out.push_str(&format_event(
                    "content_block_start",
                    &json!({
                        "type": "content_block_start",
                        "index": block_index,
                        "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} }
                    }),
                ));
                block_index
            }
        };

        if let Some(args) = delta.function.as_ref().and_then(|f| f.arguments.clone()) {
            if !args.is_empty() {
                out.push_str(&format_event(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": block_index,
                        "delta": { "type": "input_json_delta", "partial_json": args }
                    }),
                ));
            }
        }

        out
    }

    fn ensure_block_open(&mut self, kind: OpenBlock, block_type: &str, field: &str) -> String {
        if self.open == kind {
            return String::new();
        }
        let mut out = self.close_current_block();
        let index = self.next_index;
        self.next_index += 1;
        self.open = kind;
        out.push_str(&format_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": { "type": block_type, (field): "" }
            }),
        ));
        out
    }

    fn delta_event(&self, delta_type: &str, field: &str, text: &str) -> String {
        let index = self.current_index();
        format_event(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": index,
                "delta": { "type": delta_type, (field): text }
            }),
        )
    }

    fn current_index(&self) -> i32 {
        match self.open {
            OpenBlock::Tool(i) => i,
            _ => self.next_index - 1,
        }
    }

    fn close_current_block(&mut self) -> String {
        if self.open == OpenBlock::None {
            return String::new();
        }
        let index = self.current_index();
        self.open = OpenBlock::None;
        format_event(
            "content_block_stop",
            &json!({ "type": "content_block_stop", "index": index }),
        )
    }

    /// Terminal `message_delta` + `message_stop` pair. Call exactly once
    /// after the last chunk (or on upstream stream end).
    pub fn finalize(&mut self) -> String {
        let mut out = self.close_current_block();

        let stop_reason = match self.finish_reason.as_deref() {
            Some("tool_calls") => "tool_use",
            Some("length") => "max_tokens",
            Some("stop") | None => "end_turn",
            Some(_) => "end_turn",
        };
        let output_tokens = self.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0);

        out.push_str(&format_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": { "output_tokens": output_tokens }
            }),
        ));
        out.push_str(&format_event("message_stop", &json!({ "type": "message_stop" })));
        out
    }
}

impl Default for OpenAiSseToAnthropic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::openai::{ChatCompletionChunkChoice, ChatCompletionChunkDelta, FunctionCallDelta, ToolCallDelta};

    fn chunk(delta: ChatCompletionChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gpt-4".to_string(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
                logprobs: None,
            }],
            usage: None,
        }
    }

    #[test]
    fn text_delta_opens_and_fills_a_text_block() {
        let mut t = OpenAiSseToAnthropic::new();
        let out = t.translate_chunk(&chunk(
            ChatCompletionChunkDelta {
                role: Some("assistant".to_string()),
                content: Some("hello".to_string()),
                tool_calls: None,
                reasoning_content: None,
            },
            None,
        ));
        assert!(out.contains("content_block_start"));
        assert!(out.contains("text_delta"));
        assert!(out.contains("hello"));
    }

    #[test]
    fn reasoning_content_becomes_thinking_block() {
        let mut t = OpenAiSseToAnthropic::new();
        let out = t.translate_chunk(&chunk(
            ChatCompletionChunkDelta {
                role: None,
                content: None,
                tool_calls: None,
                reasoning_content: Some("pondering".to_string()),
            },
            None,
        ));
        assert!(out.contains("\"thinking\""));
        assert!(out.contains("pondering"));
    }

    #[test]
    fn tool_call_fragments_accumulate_into_input_json_deltas() {
        let mut t = OpenAiSseToAnthropic::new();
        let first = t.translate_chunk(&chunk(
            ChatCompletionChunkDelta {
                role: None,
                content: None,
                reasoning_content: None,
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("call_1".to_string()),
                    tool_type: Some("function".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some("get_weather".to_string()),
                        arguments: Some("{\"ci".to_string()),
                    }),
                }]),
            },
            None,
        ));
        let second = t.translate_chunk(&chunk(
            ChatCompletionChunkDelta {
                role: None,
                content: None,
                reasoning_content: None,
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    tool_type: None,
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some("ty\":\"SF\"}".to_string()),
                    }),
                }]),
            },
            Some("tool_calls"),
        ));
        assert!(first.contains("tool_use"));
        assert!(first.contains("get_weather"));
        assert!(second.contains("input_json_delta"));
        let end = t.finalize();
        assert!(end.contains("\"stop_reason\":\"tool_use\""));
    }

    #[test]
    fn finalize_without_tool_calls_reports_end_turn() {
        let mut t = OpenAiSseToAnthropic::new();
        t.translate_chunk(&chunk(
            ChatCompletionChunkDelta {
                role: Some("assistant".to_string()),
                content: Some("hi".to_string()),
                tool_calls: None,
                reasoning_content: None,
            },
            Some("stop"),
        ));
        let end = t.finalize();
        assert!(end.contains("content_block_stop"));
        assert!(end.contains("\"stop_reason\":\"end_turn\""));
        assert!(end.contains("message_stop"));
    }
}
