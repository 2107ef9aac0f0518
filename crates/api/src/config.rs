use std::path::PathBuf;
use std::time::Duration;

use sampler_comfyui::generation::ComfyUIConfig;
use sampler_comfyui::reconnect::BackoffConfig;
use sampler_pipeline::runner::RunnerConfig;
use sampler_pipeline::service::ServiceConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for the in-flight sample (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Generation engine, filesystem and execution settings.
    pub sampler: SamplerConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            sampler: SamplerConfig::from_env(),
        }
    }
}

/// Settings of the sample job engine.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// ComfyUI HTTP base URL.
    pub comfyui_url: String,
    /// ComfyUI WebSocket base URL.
    pub comfyui_ws_url: String,
    pub checkpoint_dir: PathBuf,
    pub workflow_dir: PathBuf,
    /// The engine's output folder, where samples land.
    pub output_dir: PathBuf,
    pub item_timeout_secs: u64,
    pub item_max_attempts: u32,
    pub item_retry_initial_delay_ms: u64,
    pub history_poll_interval_ms: u64,
}

impl SamplerConfig {
    /// Load the engine settings.
    ///
    /// | Env Var                       | Default                      |
    /// |-------------------------------|------------------------------|
    /// | `COMFYUI_URL`                 | `http://127.0.0.1:8188`      |
    /// | `COMFYUI_WS_URL`              | derived from `COMFYUI_URL`   |
    /// | `CHECKPOINT_DIR`              | `./checkpoints`              |
    /// | `WORKFLOW_DIR`                | `./workflows`                |
    /// | `SAMPLE_OUTPUT_DIR`           | `./output`                   |
    /// | `ITEM_TIMEOUT_SECS`           | `600`                        |
    /// | `ITEM_MAX_ATTEMPTS`           | `3`                          |
    /// | `ITEM_RETRY_INITIAL_DELAY_MS` | `2000`                       |
    /// | `HISTORY_POLL_INTERVAL_MS`    | `2000`                       |
    pub fn from_env() -> Self {
        let comfyui_url = std::env::var("COMFYUI_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8188".into())
            .trim_end_matches('/')
            .to_string();
        let comfyui_ws_url =
            std::env::var("COMFYUI_WS_URL").unwrap_or_else(|_| derive_ws_url(&comfyui_url));

        let dir = |key: &str, default: &str| {
            PathBuf::from(std::env::var(key).unwrap_or_else(|_| default.into()))
        };

        Self {
            checkpoint_dir: dir("CHECKPOINT_DIR", "./checkpoints"),
            workflow_dir: dir("WORKFLOW_DIR", "./workflows"),
            output_dir: dir("SAMPLE_OUTPUT_DIR", "./output"),
            item_timeout_secs: parse_env("ITEM_TIMEOUT_SECS", 600),
            item_max_attempts: parse_env("ITEM_MAX_ATTEMPTS", 3),
            item_retry_initial_delay_ms: parse_env("ITEM_RETRY_INITIAL_DELAY_MS", 2000),
            history_poll_interval_ms: parse_env("HISTORY_POLL_INTERVAL_MS", 2000),
            comfyui_url,
            comfyui_ws_url,
        }
    }

    pub fn comfyui_config(&self) -> ComfyUIConfig {
        ComfyUIConfig {
            api_url: self.comfyui_url.clone(),
            ws_url: self.comfyui_ws_url.clone(),
            history_poll_interval: Duration::from_millis(self.history_poll_interval_ms),
            reconnect: BackoffConfig::default(),
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            workflow_dir: self.workflow_dir.clone(),
            item_timeout: Duration::from_secs(self.item_timeout_secs),
            max_attempts: self.item_max_attempts,
            retry_backoff: BackoffConfig {
                initial_delay: Duration::from_millis(self.item_retry_initial_delay_ms),
                ..BackoffConfig::default()
            },
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            checkpoint_dir: self.checkpoint_dir.clone(),
            workflow_dir: self.workflow_dir.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number")),
        Err(_) => default,
    }
}

/// `http://host:port` becomes `ws://host:port`, `https` becomes `wss`.
pub fn derive_ws_url(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{http_url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_the_http_scheme() {
        assert_eq!(derive_ws_url("http://127.0.0.1:8188"), "ws://127.0.0.1:8188");
        assert_eq!(derive_ws_url("https://gpu.example:443"), "wss://gpu.example:443");
        assert_eq!(derive_ws_url("gpu:8188"), "ws://gpu:8188");
    }
}
