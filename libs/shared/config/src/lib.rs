use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_url: String,
    pub storage_api_key: String,
    pub redis_url: Option<String>,
    /// Seconds a tentative waitlist booking may stay unconfirmed.
    pub confirmation_timeout_secs: i64,
    /// Step between candidate slot starts, in minutes.
    pub slot_granularity_min: i64,
    pub max_job_retries: u32,
    pub retry_backoff_base_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            storage_url: env::var("STORAGE_URL")
                .unwrap_or_else(|_| {
                    warn!("STORAGE_URL not set, using empty value");
                    String::new()
                }),
            storage_api_key: env::var("STORAGE_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("STORAGE_API_KEY not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            confirmation_timeout_secs: parse_var("CONFIRMATION_TIMEOUT_SECS", 1800),
            slot_granularity_min: parse_var("SLOT_GRANULARITY_MIN", 15),
            max_job_retries: parse_var("MAX_JOB_RETRIES", 3),
            retry_backoff_base_secs: parse_var("RETRY_BACKOFF_BASE_SECS", 30),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.storage_url.is_empty() && !self.storage_api_key.is_empty()
    }

    pub fn is_queue_configured(&self) -> bool {
        self.redis_url.is_some()
    }
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid value, using default", name);
            default
        }),
        Err(_) => default,
    }
}
