// Converters module - format conversion between APIs
//
// This module provides conversion between OpenAI, Anthropic, and Kiro API formats.
// It follows a layered architecture:
// - core: Unified types and shared conversion logic
// - openai_to_kiro: OpenAI → Kiro conversion (shared payload builder)
// - anthropic_to_kiro: Anthropic → Kiro conversion
// - anthropic_to_openai: Anthropic → OpenAI conversion, direct (custom-account dispatch)
// - openai_sse_to_anthropic: OpenAI SSE → Anthropic SSE, direct (custom-account dispatch)
// - azure: field scrubbing for Azure-variant custom accounts
//
// Kiro's own response stream is parsed directly into Anthropic SSE/JSON by
// `streaming`, not through a dedicated kiro_to_* converter.

pub mod core;
pub mod openai_to_kiro;
pub mod anthropic_to_kiro;
pub mod anthropic_to_openai;
pub mod openai_sse_to_anthropic;
pub mod azure;
