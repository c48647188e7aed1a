use std::time::Duration;

/// Debounce window used when nothing else is configured
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
/// How long `saved` stays visible before decaying to `idle`
pub const DEFAULT_SAVED_DISPLAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the record service
    pub api_url: String,
    /// Container whose records this grid edits
    pub container_id: String,
    /// Quiet period after the last edit to a record before it is flushed
    pub debounce: Duration,
    /// Display time of the `saved` status
    pub saved_display: Duration,
    /// Per-request timeout of the HTTP client
    pub request_timeout: Duration,
    /// Buffer size of the session event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:9180".to_string(),
            container_id: "default".to_string(),
            debounce: DEFAULT_DEBOUNCE,
            saved_display: DEFAULT_SAVED_DISPLAY,
            request_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn for_container(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            api_url: std::env::var("GRID_API_URL").unwrap_or(defaults.api_url),
            container_id: std::env::var("GRID_CONTAINER_ID").unwrap_or(defaults.container_id),
            debounce: Duration::from_millis(env_parse(
                "GRID_AUTOSAVE_DEBOUNCE_MS",
                DEFAULT_DEBOUNCE.as_millis() as u64,
            )?),
            saved_display: Duration::from_millis(env_parse(
                "GRID_SAVED_DISPLAY_MS",
                DEFAULT_SAVED_DISPLAY.as_millis() as u64,
            )?),
            request_timeout: Duration::from_millis(env_parse("GRID_REQUEST_TIMEOUT_MS", 10_000)?),
            event_capacity: env_parse("GRID_EVENT_CAPACITY", defaults.event_capacity)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
