use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub extractor: ExtractorConfig,
    /// Remote row store. Absent means the app runs local-only.
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "trip-planner".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file backing the local key-value store
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/trip-planner.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Recognition language passed to the STT service
    pub language: String,
    pub nats_url: String,
    pub session_id: String,
    pub restart_after_end_ms: u64,
    pub restart_after_error_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            session_id: format!("capture-{}", uuid::Uuid::new_v4()),
            restart_after_end_ms: 200,
            restart_after_error_ms: 300,
        }
    }
}

impl CaptureConfig {
    pub fn restart_after_end(&self) -> Duration {
        Duration::from_millis(self.restart_after_end_ms)
    }

    pub fn restart_after_error(&self) -> Duration {
        Duration::from_millis(self.restart_after_error_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    /// Signed-in user. Without it every remote operation stays local-only.
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub email: Option<String>,
}

impl Config {
    /// Load `<path>.toml` (optional) layered with `TRIP_PLANNER__*` env vars
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TRIP_PLANNER").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
