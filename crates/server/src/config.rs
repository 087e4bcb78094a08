use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use comfymcp_comfyui::models::DEFAULT_MODEL_NODE;
use comfymcp_comfyui::runner::PollConfig;

/// How tool calls reach the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// WebSocket on `/ws` plus HTTP `POST /tools/call`.
    WebSocket,
    /// One JSON envelope per line on stdin, responses on stdout.
    Stdio,
    /// Model Context Protocol (JSON-RPC) on stdin/stdout.
    Mcp,
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" | "websocket" => Ok(Self::WebSocket),
            "stdio" => Ok(Self::Stdio),
            "mcp" => Ok(Self::Mcp),
            other => Err(ConfigError::Invalid {
                var: "MCP_TRANSPORT",
                value: other.to_string(),
                expected: "`ws`, `stdio` or `mcp`",
            }),
        }
    }
}

/// A configuration value could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local ComfyUI install.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `9000`).
    pub port: u16,
    /// ComfyUI base URL (default: `http://localhost:8188`).
    pub comfyui_url: String,
    /// Directory holding `<template_id>.json` workflow templates.
    pub template_dir: PathBuf,
    pub transport: Transport,
    /// First poll backoff interval.
    pub poll_initial_delay: Duration,
    /// History polls before a job times out.
    pub poll_max_attempts: u32,
    /// Loader node type introspected for model names.
    pub model_loader_node: String,
    /// HTTP `/tools/call` request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Transport {
    /// Whether stdout carries protocol frames, so logs must go elsewhere.
    pub fn uses_stdout(self) -> bool {
        matches!(self, Self::Stdio | Self::Mcp)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let poll = PollConfig::default();
        Self {
            host: "0.0.0.0".into(),
            port: 9000,
            comfyui_url: "http://localhost:8188".into(),
            template_dir: PathBuf::from("workflows"),
            transport: Transport::WebSocket,
            poll_initial_delay: poll.initial_delay,
            poll_max_attempts: poll.max_attempts,
            model_loader_node: DEFAULT_MODEL_NODE.into(),
            request_timeout_secs: 600,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `HOST`                  | `0.0.0.0`                |
    /// | `PORT`                  | `9000`                   |
    /// | `COMFYUI_URL`           | `http://localhost:8188`  |
    /// | `TEMPLATE_DIR`          | `workflows`              |
    /// | `MCP_TRANSPORT`         | `ws` (`stdio`, `mcp`)    |
    /// | `POLL_INITIAL_DELAY_MS` | `1000`                   |
    /// | `POLL_MAX_ATTEMPTS`     | `8`                      |
    /// | `MODEL_LOADER_NODE`     | `CheckpointLoaderSimple` |
    /// | `REQUEST_TIMEOUT_SECS`  | `600`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(v) => parse_num("PORT", &v, "a port number")?,
            None => defaults.port,
        };
        let transport = match var("MCP_TRANSPORT") {
            Some(v) => v.parse()?,
            None => defaults.transport,
        };
        let poll_initial_delay = match var("POLL_INITIAL_DELAY_MS") {
            Some(v) => Duration::from_millis(parse_num("POLL_INITIAL_DELAY_MS", &v, "milliseconds")?),
            None => defaults.poll_initial_delay,
        };
        let poll_max_attempts = match var("POLL_MAX_ATTEMPTS") {
            Some(v) => match parse_num("POLL_MAX_ATTEMPTS", &v, "a positive integer")? {
                0 => {
                    return Err(ConfigError::Invalid {
                        var: "POLL_MAX_ATTEMPTS",
                        value: v,
                        expected: "a positive integer",
                    })
                }
                n => n,
            },
            None => defaults.poll_max_attempts,
        };
        let request_timeout_secs = match var("REQUEST_TIMEOUT_SECS") {
            Some(v) => parse_num("REQUEST_TIMEOUT_SECS", &v, "seconds")?,
            None => defaults.request_timeout_secs,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port,
            comfyui_url: var("COMFYUI_URL").unwrap_or(defaults.comfyui_url),
            template_dir: var("TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            transport,
            poll_initial_delay,
            poll_max_attempts,
            model_loader_node: var("MODEL_LOADER_NODE").unwrap_or(defaults.model_loader_node),
            request_timeout_secs,
        })
    }

    /// Poll schedule for the job runner.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            initial_delay: self.poll_initial_delay,
            max_attempts: self.poll_max_attempts,
            ..PollConfig::default()
        }
    }
}

fn parse_num<T: FromStr>(
    var: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected,
    })
}
