use config::{Config, Environment, File, FileFormat, Map, Source};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::model::{DataMode, SourceSystem, cent_bounds};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config source error: {0}")]
    Source(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Cannot resolve working directory: {0}")]
    WorkingDir(#[from] std::io::Error),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(rename = "debuglevel", default)]
    pub debug_level: u8,
    #[serde(rename = "echoconfig", default)]
    pub echo_config: bool,
    #[serde(rename = "echoseed", default)]
    pub echo_seed: bool,
    #[serde(rename = "echojson", default)]
    pub echo_json: bool,
    #[serde(rename = "seedfile", default = "default_seed_file")]
    pub seed_file: PathBuf,
    /// Overrides the OS hostname in metric labels.
    pub hostname: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug_level: 0,
            echo_config: false,
            echo_seed: false,
            echo_json: false,
            seed_file: default_seed_file(),
            hostname: None,
        }
    }
}

fn default_seed_file() -> PathBuf {
    PathBuf::from("seed.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(rename = "datamode", default)]
    pub data_mode: DataMode,
    #[serde(rename = "sourcesystem", default)]
    pub source_system: SourceSystem,
    #[serde(rename = "mintransactionvalue", default = "default_min_value")]
    pub min_transaction_value: f64,
    #[serde(rename = "maxtransactionvalue", default = "default_max_value")]
    pub max_transaction_value: f64,
    #[serde(rename = "recordcount", default = "default_record_count")]
    pub record_count: usize,
    /// Upper bound of the random pause between records. 0 disables pacing.
    #[serde(rename = "sleepms", default)]
    pub sleep_ms: u64,
    /// Re-seed the generator from `rng_seed` at the start of every build.
    #[serde(rename = "deterministicseed", default)]
    pub deterministic_seed: bool,
    #[serde(rename = "rngseed", default)]
    pub rng_seed: u64,
    /// Redraw the creditor until it differs from the debtor instead of once.
    #[serde(rename = "strictdistinctaccounts", default)]
    pub strict_distinct_accounts: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            data_mode: DataMode::default(),
            source_system: SourceSystem::default(),
            min_transaction_value: default_min_value(),
            max_transaction_value: default_max_value(),
            record_count: default_record_count(),
            sleep_ms: 0,
            deterministic_seed: false,
            rng_seed: 0,
            strict_distinct_accounts: false,
        }
    }
}

fn default_min_value() -> f64 {
    1.0
}

fn default_max_value() -> f64 {
    1000.0
}

fn default_record_count() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "certdir", default)]
    pub cert_dir: Option<PathBuf>,
    #[serde(rename = "certfile", default)]
    pub cert_file: PathBuf,
    #[serde(rename = "certkey", default)]
    pub cert_key: PathBuf,
    /// Trust bundle for the server certificate. Falls back to `cert_file`.
    #[serde(rename = "cafile", default)]
    pub ca_file: Option<PathBuf>,
    /// Disables server certificate verification. Off unless set explicitly.
    #[serde(rename = "acceptinvalidcerts", default)]
    pub accept_invalid_certs: bool,
    #[serde(rename = "proxyurl", default)]
    pub proxy_url: Option<String>,
    #[serde(rename = "timeoutsecs", default)]
    pub timeout_secs: Option<u64>,
}

impl ApiConfig {
    fn in_cert_dir(&self, file: &Path) -> PathBuf {
        match &self.cert_dir {
            Some(dir) => dir.join(file),
            None => file.to_path_buf(),
        }
    }

    pub fn cert_path(&self) -> PathBuf {
        self.in_cert_dir(&self.cert_file)
    }

    pub fn key_path(&self) -> PathBuf {
        self.in_cert_dir(&self.cert_key)
    }

    pub fn ca_path(&self) -> PathBuf {
        match &self.ca_file {
            Some(ca) => self.in_cert_dir(ca),
            None => self.cert_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InputConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "pushgateway", default)]
    pub push_gateway: String,
    #[serde(default = "default_job")]
    pub job: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            push_gateway: String::new(),
            job: default_job(),
        }
    }
}

fn default_job() -> String {
    "pushgateway".to_string()
}

impl Settings {
    /// Layered load: `<run_mode>_app.*` in the working directory, then
    /// `config/local`, then `LOADGEN_*` environment overrides
    /// (e.g. `LOADGEN_API__URL`, `LOADGEN_GENERATOR__RECORD_COUNT`).
    pub fn load(run_mode: &str) -> Result<Self, ConfigError> {
        Self::load_layered(&env::current_dir()?, run_mode, None)
    }

    /// Layered load rooted at `base_dir`. `env_vars` stands in for the
    /// process environment when given.
    pub fn load_layered(
        base_dir: &Path,
        run_mode: &str,
        env_vars: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let app_file = base_dir.join(format!("{}_app", run_mode));
        let local_file = base_dir.join("config").join("local");

        let mut merged = layer(File::with_name(&app_file.to_string_lossy()).required(true))?;
        merge(
            &mut merged,
            layer(File::with_name(&local_file.to_string_lossy()).required(false))?,
        );
        merge(
            &mut merged,
            layer(
                Environment::with_prefix("LOADGEN")
                    .prefix_separator("_")
                    .separator("__")
                    .source(env_vars),
            )?,
        );

        Self::from_layers(merged, base_dir)
    }

    /// Parse an in-memory JSON document. Used by tests and tooling.
    pub fn from_json_str(raw: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let merged = layer(File::from_str(raw, FileFormat::Json))?;
        Self::from_layers(merged, base_dir)
    }

    fn from_layers(merged: Value, base_dir: &Path) -> Result<Self, ConfigError> {
        // Re-read through config so string values from the environment
        // coerce into numbers and booleans.
        let settings: Settings = Config::builder()
            .add_source(File::from_str(&merged.to_string(), FileFormat::Json))
            .build()?
            .try_deserialize()?;
        settings.finalize(base_dir)
    }

    fn finalize(mut self, base_dir: &Path) -> Result<Self, ConfigError> {
        self.resolve_paths(base_dir);
        self.validate()?;
        Ok(self)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };

        self.general.seed_file = resolve(&self.general.seed_file);
        self.api.cert_dir = self.api.cert_dir.as_deref().map(resolve);
        if self.api.cert_dir.is_none() {
            self.api.cert_file = resolve(&self.api.cert_file);
            self.api.cert_key = resolve(&self.api.cert_key);
            self.api.ca_file = self.api.ca_file.as_deref().map(resolve);
        }
        self.input.path = self.input.path.as_deref().map(resolve);
        self.output.path = self.output.path.as_deref().map(resolve);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generator;
        if g.min_transaction_value < 0.0 || g.max_transaction_value < 0.0 {
            return Err(ConfigError::Invalid(
                "transaction values must be non-negative".to_string(),
            ));
        }
        if g.min_transaction_value > g.max_transaction_value {
            return Err(ConfigError::Invalid(format!(
                "min_transaction_value {} exceeds max_transaction_value {}",
                g.min_transaction_value, g.max_transaction_value
            )));
        }
        let (lo, hi) = cent_bounds(g.min_transaction_value, g.max_transaction_value);
        if lo > hi {
            return Err(ConfigError::Invalid(format!(
                "no whole-cent amount between {} and {}",
                g.min_transaction_value, g.max_transaction_value
            )));
        }
        if self.api.enabled {
            Url::parse(&self.api.url)
                .map_err(|e| ConfigError::Invalid(format!("api.url '{}': {}", self.api.url, e)))?;
            if let Some(proxy) = &self.api.proxy_url {
                Url::parse(proxy)
                    .map_err(|e| ConfigError::Invalid(format!("api.proxy_url '{}': {}", proxy, e)))?;
            }
        }
        if self.metrics.enabled {
            Url::parse(&self.metrics.push_gateway).map_err(|e| {
                ConfigError::Invalid(format!(
                    "metrics.push_gateway '{}': {}",
                    self.metrics.push_gateway, e
                ))
            })?;
        }
        if self.input.enabled && self.input.path.is_none() {
            return Err(ConfigError::Invalid(
                "input.path is required when reading scenario files".to_string(),
            ));
        }
        if self.output.enabled && self.output.path.is_none() {
            return Err(ConfigError::Invalid(
                "output.path is required when writing files".to_string(),
            ));
        }
        Ok(())
    }

    /// `service` metric label: `rpp` for real-time runs, else the source system.
    pub fn service_label(&self) -> &'static str {
        match self.generator.data_mode {
            DataMode::RealTime => "rpp",
            DataMode::Historical => self.generator.source_system.as_str(),
        }
    }
}

/// One source, read on its own and normalised.
fn layer<S>(source: S) -> Result<Value, ConfigError>
where
    S: Source + Send + Sync + 'static,
{
    let raw: Value = Config::builder().add_source(source).build()?.try_deserialize()?;
    Ok(normalize(raw, None))
}

/// Keys are folded to one spelling per field so that `recordCount`,
/// `record_count` and `RECORD_COUNT` from different layers override each
/// other instead of colliding.
fn normalize(value: Value, section: Option<&str>) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = JsonMap::new();
            for (key, child) in map {
                let key = canonical_key(section, &key);
                let child = normalize(child, Some(key.as_str()));
                out.insert(key, child);
            }
            Value::Object(out)
        }
        other => other,
    }
}

fn canonical_key(section: Option<&str>, key: &str) -> String {
    let folded: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    let legacy = match (section, folded.as_str()) {
        (Some("generator"), "testsize") => Some("recordcount"),
        (Some("generator"), "sleep") => Some("sleepms"),
        (Some("api"), "callfsapi") => Some("enabled"),
        (Some("api"), "httpposturl") => Some("url"),
        (Some("input"), "jsonfromfile") => Some("enabled"),
        (Some("input"), "inputpath") => Some("path"),
        (Some("output"), "jsontofile") => Some("enabled"),
        (Some("output"), "outputpath") => Some("path"),
        (Some("metrics"), "prometheusenabled") => Some("enabled"),
        _ => None,
    };
    legacy.map(str::to_string).unwrap_or(folded)
}

/// Later layers win, tables merge key by key.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
