//! Configuration management

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub sqs: SqsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
            pipeline_depth: default_pipeline_depth(),
        }
    }
}

/// Which services get a routing table entry
#[derive(Debug, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_true")]
    pub sqs: bool,

    #[serde(default = "default_true")]
    pub s3: bool,

    #[serde(default = "default_true")]
    pub dynamodb: bool,

    #[serde(default = "default_true")]
    pub lambda: bool,

    #[serde(default = "default_true")]
    pub cognito: bool,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            sqs: true,
            s3: true,
            dynamodb: true,
            lambda: true,
            cognito: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SqsConfig {
    /// Seconds between reclamation sweep passes
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

fn default_port() -> u16 {
    4566
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_pipeline_depth() -> usize {
    64
}

fn default_reap_interval_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("mockstack").required(false))
            .add_source(config::Environment::with_prefix("MOCKSTACK").separator("__"))
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }
}
