// Configuration module
// Loads and validates configuration from CLI args, environment variables, and defaults

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Kiro Gateway - Rust Implementation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// A global fallback identity, usable by an operator who wants a single
/// Kiro credential shared by every user rather than per-user onboarding.
/// Optional: when any of the four fields is unset the gateway simply has no
/// fallback and every user must register their own credentials.
#[derive(Clone, Debug, Default)]
pub struct FallbackIdentity {
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub region: Option<String>,
    pub profile_arn: Option<String>,
}

pub const SUPPORTED_REGIONS: &[&str] = &["us-east-1", "ap-southeast-1", "eu-west-1"];

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Persistence & encryption
    pub db_file: PathBuf,
    pub token_encrypt_key: String,
    pub production: bool,

    // Global fallback identity (optional)
    pub fallback_identity: FallbackIdentity,

    // Outbound proxy
    pub http_proxy: Option<String>,
    pub socks5_proxy: Option<String>,

    // Timeouts
    pub token_refresh_threshold: u64,
    pub first_token_timeout: u64,
    pub health_check_interval: u64,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    // Debug
    pub debug_mode: DebugMode,
    pub log_level: String,

    // Converter settings
    pub tool_description_max_length: usize,
    // Opt-in: legitimizes `<thinking_mode>` tags via a system prompt addition
    // so models without native extended-thinking still produce a visible
    // reasoning trace. Off by default; set FAKE_REASONING=true to enable.
    pub fake_reasoning_enabled: bool,
    pub fake_reasoning_max_tokens: u32,
    #[allow(dead_code)]
    pub fake_reasoning_handling: FakeReasoningHandling,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FakeReasoningHandling {
    AsReasoningContent,  // Extract to reasoning_content field (OpenAI-compatible)
    Remove,              // Remove thinking block completely
    Pass,                // Pass through with original tags
    StripTags,           // Remove tags but keep content
}

#[derive(Clone, Debug, PartialEq)]
pub enum DebugMode {
    Off,
    Errors,
    All,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Parse CLI arguments
        let args = CliArgs::parse();

        let production = std::env::var("GATEWAY_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let config = Config {
            server_host: args
                .host
                .or_else(|| std::env::var("SERVER_HOST").ok())
                .unwrap_or_else(|| "0.0.0.0".to_string()),

            server_port: args
                .port
                .or_else(|| std::env::var("SERVER_PORT").ok().and_then(|s| s.parse().ok()))
                .unwrap_or(8000),

            db_file: std::env::var("DB_FILE")
                .map(|s| expand_tilde(&s))
                .unwrap_or_else(|_| PathBuf::from("gateway.db")),

            token_encrypt_key: std::env::var("TOKEN_ENCRYPT_KEY")
                .context("TOKEN_ENCRYPT_KEY environment variable is required")?,

            production,

            fallback_identity: FallbackIdentity {
                refresh_token: std::env::var("REFRESH_TOKEN").ok(),
                client_id: std::env::var("CLIENT_ID").ok(),
                client_secret: std::env::var("CLIENT_SECRET").ok(),
                region: std::env::var("REGION").ok(),
                profile_arn: std::env::var("PROFILE_ARN").ok(),
            },

            http_proxy: std::env::var("HTTP_PROXY").ok(),
            socks5_proxy: std::env::var("SOCKS5_PROXY").ok(),

            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            first_token_timeout: std::env::var("FIRST_TOKEN_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),

            health_check_interval: std::env::var("HEALTH_CHECK_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            // HTTP client
            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            http_request_timeout: std::env::var("HTTP_REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            http_max_retries: std::env::var("HTTP_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),

            // Debug
            debug_mode: parse_debug_mode(&std::env::var("DEBUG_MODE").unwrap_or_default()),

            log_level: args
                .log_level
                .or_else(|| std::env::var("LOG_LEVEL").ok())
                .unwrap_or_else(|| "info".to_string()),

            // Converter settings
            tool_description_max_length: std::env::var("TOOL_DESCRIPTION_MAX_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10000),

            fake_reasoning_enabled: {
                let raw = std::env::var("FAKE_REASONING").unwrap_or_default().to_lowercase();
                matches!(raw.as_str(), "true" | "1" | "yes" | "enabled" | "on")
            },

            fake_reasoning_max_tokens: std::env::var("FAKE_REASONING_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4000),

            fake_reasoning_handling: parse_fake_reasoning_handling(
                &std::env::var("FAKE_REASONING_HANDLING").unwrap_or_default()
            ),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(region) = &self.fallback_identity.region {
            if !SUPPORTED_REGIONS.contains(&region.as_str()) {
                anyhow::bail!(
                    "REGION '{}' is not one of the supported regions: {:?}",
                    region,
                    SUPPORTED_REGIONS
                );
            }
        }
        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

/// Parse debug mode from string
fn parse_debug_mode(s: &str) -> DebugMode {
    match s.to_lowercase().as_str() {
        "errors" => DebugMode::Errors,
        "all" => DebugMode::All,
        _ => DebugMode::Off,
    }
}

/// Parse fake reasoning handling mode from string
fn parse_fake_reasoning_handling(s: &str) -> FakeReasoningHandling {
    match s.to_lowercase().as_str() {
        "remove" => FakeReasoningHandling::Remove,
        "pass" => FakeReasoningHandling::Pass,
        "strip_tags" => FakeReasoningHandling::StripTags,
        _ => FakeReasoningHandling::AsReasoningContent, // default
    }
}
