//! API configuration.

use cutmedia_runner::RunnerConfig;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Serve Prometheus metrics at /metrics
    pub metrics_enabled: bool,
    /// Ceiling on a single log tail request; `None` serves any size
    pub log_tail_max: Option<u64>,
    /// Worker and storage settings
    pub runner: RunnerConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: usize::try_from(5u64 << 30).unwrap_or(usize::MAX), // 5GB
            environment: "development".to_string(),
            metrics_enabled: true,
            log_tail_max: None,
            runner: RunnerConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            log_tail_max: std::env::var("LOG_TAIL_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0),
            runner: RunnerConfig::from_env(),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Resolve a requested log tail: missing or zero means the default,
    /// and the configured ceiling applies if there is one.
    pub fn log_tail(&self, requested: Option<u64>) -> u64 {
        let tail = requested
            .filter(|n| *n > 0)
            .unwrap_or(self.runner.log_tail_default);
        match self.log_tail_max {
            Some(max) => tail.min(max),
            None => tail,
        }
    }
}
