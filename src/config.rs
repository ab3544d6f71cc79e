use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration for a ladder-builder run.
///
/// Loaded the same way the original backend loads `AppConfig`: defaults, then
/// an optional TOML file, then `LADDER_`-prefixed environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub sport: Sport,
    pub document_store: DocumentStoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which sport's filters, namespace, and metadata hook to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Football,
    Tennis,
    Horseracing,
}

impl Sport {
    /// Database/namespace name the document store groups this sport's output under.
    pub fn namespace(&self) -> &'static str {
        match self {
            Sport::Football => "football_betfair",
            Sport::Tennis => "tennis_betfair",
            Sport::Horseracing => "horseracing_betfair",
        }
    }
}

impl std::str::FromStr for Sport {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "football" => Ok(Sport::Football),
            "tennis" => Ok(Sport::Tennis),
            "horseracing" | "horse_racing" | "horse-racing" => Ok(Sport::Horseracing),
            other => Err(ConfigError::Message(format!(
                "unknown sport \"{other}\", expected football|tennis|horseracing"
            ))),
        }
    }
}

/// Blob store configuration (`folder` in the spec's enumerated config).
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Source prefix/folder to enumerate market files under.
    pub folder: String,
}

/// Destination document store configuration (`uri` in the spec's enumerated config).
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStoreConfig {
    /// Postgres connection URL backing the metadata/ladder/marketdata collections.
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Concurrency/batching knobs for the per-file pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Enable the bounded concurrent per-file worker pool (`is_multiprocess`).
    #[serde(default)]
    pub is_multiprocess: bool,
    /// Upper bound on simultaneously in-flight per-file workers.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Document-store insert batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            is_multiprocess: false,
            worker_concurrency: default_worker_concurrency(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_worker_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_batch_size() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a `config/` directory (or a single TOML file) and
    /// `LADDER_`-prefixed environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_path = config_dir.as_ref();

        let mut builder = Config::builder()
            .set_default("pipeline.is_multiprocess", false)?
            .set_default("pipeline.worker_concurrency", default_worker_concurrency() as i64)?
            .set_default("pipeline.batch_size", default_batch_size() as i64)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("document_store.max_connections", 5)?;

        if config_path.is_file() {
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::from(config_path.join("default.toml")).required(false))
                .add_source(
                    File::from(config_path.join(
                        std::env::var("LADDER_ENV").unwrap_or_else(|_| "development".to_string()),
                    ))
                    .required(false),
                );
        }

        builder = builder.add_source(
            Environment::with_prefix("LADDER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate().map_err(ConfigError::Message)?;
        Ok(cfg)
    }

    /// Validate cross-field invariants not expressible via serde defaults alone.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.source.folder.trim().is_empty() {
            return Err("source.folder must not be empty".to_string());
        }
        if self.pipeline.batch_size == 0 {
            return Err("pipeline.batch_size must be > 0".to_string());
        }
        if self.pipeline.worker_concurrency == 0 {
            return Err("pipeline.worker_concurrency must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sport_namespace_is_stable_per_sport() {
        assert_eq!(Sport::Football.namespace(), "football_betfair");
        assert_eq!(Sport::Tennis.namespace(), "tennis_betfair");
        assert_eq!(Sport::Horseracing.namespace(), "horseracing_betfair");
    }

    #[test]
    fn sport_from_str_accepts_known_aliases() {
        assert_eq!("football".parse::<Sport>().unwrap(), Sport::Football);
        assert_eq!("HorseRacing".parse::<Sport>().unwrap(), Sport::Horseracing);
        assert!("cricket".parse::<Sport>().is_err());
    }

    fn sample_config() -> AppConfig {
        AppConfig {
            source: SourceConfig {
                folder: "betfair-data/horse-racing/2023/Jan/3".to_string(),
            },
            sport: Sport::Horseracing,
            document_store: DocumentStoreConfig {
                uri: "postgres://localhost/horseracing_betfair".to_string(),
                max_connections: 5,
            },
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn validate_rejects_empty_folder() {
        let mut cfg = sample_config();
        cfg.source.folder = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut cfg = sample_config();
        cfg.pipeline.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_sample_config() {
        assert!(sample_config().validate().is_ok());
    }
}
