//! Configuration (section 12): loaded once at startup from environment
//! variables (with `.env` support), optionally seeded from a TOML file
//! passed via `--config`. Environment variables always override the
//! file. The resulting [`Config`] is a read-only snapshot handed to
//! every request; there is no hot reload.

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::types::{Provider, ProxyError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    pub mode: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_chat_path: Option<String>,
    pub llm_api_key: Option<String>,
    pub ollama_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    pub pass_tools: Option<bool>,
    pub enable_tool_reinjection: Option<bool>,
    pub tool_reinjection_message_count: Option<usize>,
    pub tool_reinjection_token_count: Option<usize>,
    pub tool_reinjection_type: Option<String>,
    pub max_tool_iterations: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PerformanceConfig {
    pub max_buffer_size: Option<usize>,
    pub connection_timeout: Option<u64>,
    pub max_stream_buffer_size: Option<usize>,
    pub stream_connection_timeout: Option<u64>,
}

/// Raw shape of an optional TOML config file, every field optional since
/// environment variables may fill in the rest (or everything).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    pub debug_mode: Option<bool>,
}

/// The resolved, read-only configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_mode: Provider,
    pub backend_llm_base_url: String,
    pub backend_llm_chat_path: String,
    pub backend_llm_api_key: Option<String>,
    pub ollama_base_url: String,

    pub proxy_host: String,
    pub proxy_port: u16,

    pub pass_tools: bool,
    pub enable_tool_reinjection: bool,
    pub tool_reinjection_message_count: usize,
    pub tool_reinjection_token_count: usize,
    /// Explicit override of the re-injection role; `None` means the
    /// automatic system-vs-user rule from 4.C applies.
    pub tool_reinjection_type: Option<crate::types::Role>,
    /// Accepted for forward compatibility with multi-turn tool-executing
    /// clients; this proxy never executes tools itself so the bound is
    /// not enforced here.
    pub max_tool_iterations: u32,

    pub max_buffer_size: usize,
    pub connection_timeout_secs: u64,
    pub max_stream_buffer_size: usize,
    pub stream_connection_timeout_secs: u64,

    pub debug_mode: bool,
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_override<T: std::str::FromStr>(key: &str, current: T) -> Result<T> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse::<T>()
            .map_err(|_| ProxyError::Configuration(format!("{key} has an invalid value: '{v}'"))),
        _ => Ok(current),
    }
}

fn env_override_bool(key: &str, current: bool) -> bool {
    env::var(key).map(|v| parse_bool(&v)).unwrap_or(current)
}

fn env_override_string(key: &str, current: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(current)
}

fn env_override_opt_string(key: &str, current: Option<String>) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty()).or(current)
}

impl Config {
    /// Load `.env` (if present), optionally seed from a TOML file, then
    /// apply environment overrides matching exactly the surface named in
    /// section 12.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ProxyError::Configuration(format!("failed to read {}: {e}", path.display()))
                })?;
                toml::from_str::<FileConfig>(&text)
                    .map_err(|e| ProxyError::Configuration(format!("invalid config file: {e}")))?
            }
            None => FileConfig::default(),
        };

        let backend_mode_str = env_override_string(
            "BACKEND_MODE",
            file.backend.mode.unwrap_or_else(|| "openai".to_string()),
        );
        let backend_mode: Provider = backend_mode_str.parse()?;

        let backend_llm_base_url = env_override_opt_string("BACKEND_LLM_BASE_URL", file.backend.llm_base_url)
            .ok_or_else(|| ProxyError::Configuration("BACKEND_LLM_BASE_URL is required".to_string()))?;

        let backend_llm_chat_path = env_override_string(
            "BACKEND_LLM_CHAT_PATH",
            file.backend.llm_chat_path.unwrap_or_else(|| "/chat/completions".to_string()),
        );

        let backend_llm_api_key = env_override_opt_string("BACKEND_LLM_API_KEY", file.backend.llm_api_key);

        let ollama_base_url = env_override_string(
            "OLLAMA_BASE_URL",
            file.backend.ollama_base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
        );

        let proxy_host = env_override_string(
            "PROXY_HOST",
            file.server.host.unwrap_or_else(|| "127.0.0.1".to_string()),
        );
        let proxy_port = env_override("PROXY_PORT", file.server.port.unwrap_or(8080))?;

        let pass_tools = env_override_bool("PASS_TOOLS", file.tools.pass_tools.unwrap_or(false));
        let enable_tool_reinjection =
            env_override_bool("ENABLE_TOOL_REINJECTION", file.tools.enable_tool_reinjection.unwrap_or(true));
        let tool_reinjection_message_count = env_override(
            "TOOL_REINJECTION_MESSAGE_COUNT",
            file.tools.tool_reinjection_message_count.unwrap_or(3),
        )?;
        let tool_reinjection_token_count = env_override(
            "TOOL_REINJECTION_TOKEN_COUNT",
            file.tools.tool_reinjection_token_count.unwrap_or(1000),
        )?;
        let tool_reinjection_type_str =
            env_override_opt_string("TOOL_REINJECTION_TYPE", file.tools.tool_reinjection_type);
        let tool_reinjection_type = match tool_reinjection_type_str.as_deref() {
            Some("system") => Some(crate::types::Role::System),
            Some("user") => Some(crate::types::Role::User),
            Some(other) => {
                return Err(ProxyError::Configuration(format!(
                    "TOOL_REINJECTION_TYPE must be 'system' or 'user', got '{other}'"
                )))
            }
            None => None,
        };
        let max_tool_iterations =
            env_override("MAX_TOOL_ITERATIONS", file.tools.max_tool_iterations.unwrap_or(5))?;

        let max_buffer_size = env_override(
            "MAX_BUFFER_SIZE",
            file.performance.max_buffer_size.unwrap_or(50 * 1024 * 1024),
        )?;
        let connection_timeout_secs =
            env_override("CONNECTION_TIMEOUT", file.performance.connection_timeout.unwrap_or(120))?;
        let max_stream_buffer_size = env_override(
            "MAX_STREAM_BUFFER_SIZE",
            file.performance.max_stream_buffer_size.unwrap_or(1024 * 1024),
        )?;
        let stream_connection_timeout_secs = env_override(
            "STREAM_CONNECTION_TIMEOUT",
            file.performance.stream_connection_timeout.unwrap_or(120),
        )?;

        let debug_mode = env_override_bool("DEBUG_MODE", file.debug_mode.unwrap_or(false));

        Ok(Config {
            backend_mode,
            backend_llm_base_url,
            backend_llm_chat_path,
            backend_llm_api_key,
            ollama_base_url,
            proxy_host,
            proxy_port,
            pass_tools,
            enable_tool_reinjection,
            tool_reinjection_message_count,
            tool_reinjection_token_count,
            tool_reinjection_type,
            max_tool_iterations,
            max_buffer_size,
            connection_timeout_secs,
            max_stream_buffer_size,
            stream_connection_timeout_secs,
            debug_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_mode_parses_case_insensitively() {
        assert_eq!("OPENAI".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert_eq!("ollama".parse::<Provider>().unwrap(), Provider::Ollama);
        assert!("bedrock".parse::<Provider>().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_truthy_spellings() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn load_seeds_fields_from_a_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("toolbridge.toml");
        std::fs::write(
            &path,
            r#"
            [backend]
            mode = "ollama"
            llm_base_url = "http://file-configured.example"
            ollama_base_url = "http://localhost:9999"

            [tools]
            tool_reinjection_type = "user"
            "#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.backend_mode, Provider::Ollama);
        assert_eq!(config.backend_llm_base_url, "http://file-configured.example");
        assert_eq!(config.ollama_base_url, "http://localhost:9999");
        assert_eq!(config.tool_reinjection_type, Some(crate::types::Role::User));
    }

    #[test]
    fn load_rejects_an_unrecognized_reinjection_role() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("toolbridge.toml");
        std::fs::write(
            &path,
            r#"
            [backend]
            llm_base_url = "http://example.invalid"

            [tools]
            tool_reinjection_type = "both"
            "#,
        )
        .unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
    }
}
