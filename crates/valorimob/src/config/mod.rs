use crate::ingestion::{IngestionConfig, Municipality, SidraConfig};
use crate::publish::PublishConfig;
use crate::valuation::ModelConfig;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MUNICIPALITIES: &str = "Paranagua:4117700,Pontal_do_Parana:4118203";
const DEFAULT_YEARS: &str = "2015-2025";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration, loaded once at startup and handed to each stage.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub sources: SourcesConfig,
    pub ingestion: IngestionConfig,
    pub staging: StagingConfig,
    pub publish: PublishSettings,
    pub model: ModelConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = var_or("APP_LOG_LEVEL", "info");

        let sources = SourcesConfig {
            listings_dir: PathBuf::from(var_or("VALORIMOB_LISTINGS_DIR", "data/raw/imoveis")),
            municipalities: parse_municipalities(&var_or(
                "VALORIMOB_MUNICIPALITIES",
                DEFAULT_MUNICIPALITIES,
            ))?,
            years: parse_years(&var_or("VALORIMOB_YEARS", DEFAULT_YEARS))?,
            sidra: SidraConfig {
                base_url: var_or("VALORIMOB_SIDRA_BASE_URL", &SidraConfig::default().base_url),
                table: parse_var("VALORIMOB_SIDRA_TABLE", 6562)?,
                variable: parse_var("VALORIMOB_SIDRA_VARIABLE", 7694)?,
            },
        };

        let ingestion = IngestionConfig {
            fetch_timeout: Duration::from_secs(parse_var("VALORIMOB_FETCH_TIMEOUT_SECS", 30)?),
            max_concurrent_fetches: parse_var("VALORIMOB_MAX_CONCURRENT_FETCHES", 4)?,
        };

        let staging = StagingConfig {
            dir: PathBuf::from(var_or("VALORIMOB_STAGING_DIR", "data/processed")),
        };

        let publish = PublishSettings {
            object_store_dir: PathBuf::from(var_or(
                "VALORIMOB_OBJECT_STORE_DIR",
                "data/object-store",
            )),
            warehouse_dir: PathBuf::from(var_or("VALORIMOB_WAREHOUSE_DIR", "data/warehouse")),
            target: PublishConfig {
                bucket: var_or("VALORIMOB_BUCKET", "valorimob"),
                prefix: var_or("VALORIMOB_PREFIX", "valorimob/"),
                project: var_or("VALORIMOB_PROJECT", "valorimob"),
                dataset: var_or("VALORIMOB_DATASET", "valorimob"),
                timeout: Duration::from_secs(parse_var("VALORIMOB_PUBLISH_TIMEOUT_SECS", 60)?),
            },
        };

        let test_ratio: f64 = parse_var("VALORIMOB_TEST_RATIO", 0.2)?;
        if !(test_ratio > 0.0 && test_ratio < 1.0) {
            return Err(ConfigError::InvalidTestRatio { value: test_ratio });
        }
        let max_depth = match env::var("VALORIMOB_MAX_DEPTH") {
            Ok(value) if !value.trim().is_empty() => Some(parse_value("VALORIMOB_MAX_DEPTH", &value)?),
            _ => None,
        };
        let model = ModelConfig {
            seed: parse_var("VALORIMOB_SEED", 42)?,
            test_ratio,
            n_estimators: parse_var("VALORIMOB_TREES", 100)?,
            max_depth,
            ..ModelConfig::default()
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            sources,
            ingestion,
            staging,
            publish,
            model,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the upstream sources live and which partitions they declare.
#[derive(Debug, Clone)]
pub struct SourcesConfig {
    pub listings_dir: PathBuf,
    pub municipalities: Vec<Municipality>,
    pub years: Vec<i32>,
    pub sidra: SidraConfig,
}

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub dir: PathBuf,
}

/// Local roots of the object store and warehouse, plus publish destinations.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub object_store_dir: PathBuf,
    pub warehouse_dir: PathBuf,
    pub target: PublishConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
    InvalidMunicipalities { value: String },
    InvalidYears { value: String },
    InvalidTestRatio { value: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be a number, got '{value}'")
            }
            ConfigError::InvalidMunicipalities { value } => write!(
                f,
                "VALORIMOB_MUNICIPALITIES must look like 'Name:code,Name:code', got '{value}'"
            ),
            ConfigError::InvalidYears { value } => write!(
                f,
                "VALORIMOB_YEARS must be a range 'YYYY-YYYY' or a list 'YYYY,YYYY', got '{value}'"
            ),
            ConfigError::InvalidTestRatio { value } => {
                write!(f, "VALORIMOB_TEST_RATIO must be strictly between 0 and 1, got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

fn var_or(variable: &str, default: &str) -> String {
    env::var(variable).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(value) => parse_value(variable, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(variable: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber {
            variable,
            value: value.to_string(),
        })
}

fn parse_municipalities(value: &str) -> Result<Vec<Municipality>, ConfigError> {
    let invalid = || ConfigError::InvalidMunicipalities {
        value: value.to_string(),
    };

    let municipalities = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, code) = entry.split_once(':').ok_or_else(invalid)?;
            let code = code.trim().parse::<u32>().map_err(|_| invalid())?;
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid());
            }
            Ok(Municipality::new(name, code))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if municipalities.is_empty() {
        return Err(invalid());
    }
    Ok(municipalities)
}

fn parse_years(value: &str) -> Result<Vec<i32>, ConfigError> {
    let invalid = || ConfigError::InvalidYears {
        value: value.to_string(),
    };
    let trimmed = value.trim();

    let years = if let Some((start, end)) = trimmed.split_once('-') {
        let start = start.trim().parse::<i32>().map_err(|_| invalid())?;
        let end = end.trim().parse::<i32>().map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
        (start..=end).collect::<Vec<_>>()
    } else {
        trimmed
            .split(',')
            .map(|year| year.trim().parse::<i32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?
    };

    if years.is_empty() {
        return Err(invalid());
    }
    Ok(years)
}
