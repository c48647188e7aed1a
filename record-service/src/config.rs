use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the record service listens on
    pub port: u16,
    /// Optional JSON file with initial records per container
    pub seed_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: env_parse("RECORD_SERVICE_PORT", 9180)?,
            seed_path: std::env::var("RECORD_SERVICE_SEED")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
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
