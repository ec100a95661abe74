use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::download::{DownloadPolicy, MAX_IMAGE_BYTES};
use crate::filter::FilterRules;
use crate::models::{BrowserEngine, SessionConfig};
use crate::packager::ArchiveOptions;
use crate::retry::RetryPolicy;

/// Prefix shared by every recognized environment variable.
const ENV_PREFIX: &str = "HARVEST_";

/// Environment variable naming a TOML config file to load instead of the
/// environment.
pub const CONFIG_FILE_ENV: &str = "HARVEST_CONFIG";

const KNOWN_ENV_VARS: &[&str] = &[
    "HARVEST_CONFIG",
    "HARVEST_TARGET_LIST_PATH",
    "HARVEST_OUTPUT_DIR",
    "HARVEST_BROWSER_ENGINE",
    "HARVEST_HEADLESS",
    "HARVEST_MAX_IMAGES",
    "HARVEST_PAGE_TIMEOUT_SECS",
    "HARVEST_CREATE_ARCHIVE",
    "HARVEST_ARCHIVE_ONLY",
    "HARVEST_ARCHIVE_EMPTY",
    "HARVEST_SINGLE_ENTITY_ID",
    "HARVEST_SINGLE_ENTITY_NAME",
    "HARVEST_DEBUG_LOGGING",
    "HARVEST_DOWNLOAD_CONCURRENCY",
    "HARVEST_ENTITY_CONCURRENCY",
    "HARVEST_DOWNLOAD_ATTEMPTS",
    "HARVEST_RETRY_BASE_DELAY_MS",
    "HARVEST_RETRY_MULTIPLIER",
    "HARVEST_SESSION_ATTEMPTS",
    "HARVEST_NAVIGATION_ATTEMPTS",
    "HARVEST_STRATEGY_TIMEOUT_SECS",
    "HARVEST_REQUEST_TIMEOUT_SECS",
    "HARVEST_SETTLE_DELAY_MS",
    "HARVEST_MIN_WIDTH",
    "HARVEST_MIN_HEIGHT",
    "HARVEST_DEDUP_THRESHOLD",
    "HARVEST_BROWSER_WS_URL",
    "HARVEST_CHROME_PATH",
    "HARVEST_SEARCH_URL_TEMPLATE",
    "HARVEST_CLICK_THROUGH_LIMIT",
    "HARVEST_SCROLL_ROUNDS",
];

/// Default results page: large images only.
pub const DEFAULT_SEARCH_URL_TEMPLATE: &str =
    "https://www.google.com/search?q={query}&tbm=isch&tbs=isz:l";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown configuration option: {0}")]
    UnknownOption(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("conflicting options: {0}")]
    Conflict(String),
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
    #[error("failed to read config file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Validated settings for one harvesting run.
#[derive(Debug, Clone)]
pub struct Config {
    // Input / output
    pub target_list_path: PathBuf,
    pub output_dir: PathBuf,

    // Browser
    pub browser_engine: BrowserEngine,
    pub headless: bool,
    pub page_timeout: Duration,
    pub browser_ws_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub search_url_template: String,
    pub session_attempts: u32,
    pub navigation_attempts: u32,
    pub settle_delay: Duration,

    // Extraction
    pub strategy_timeout: Duration,
    pub click_through_limit: usize,
    pub scroll_rounds: usize,

    // Filtering
    pub max_images: usize,
    pub min_width: u32,
    pub min_height: u32,

    // Downloads
    pub download_concurrency: usize,
    pub download_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_multiplier: f64,
    pub request_timeout: Duration,
    /// Perceptual-hash distance at or below which two images count as the same.
    /// `None` disables duplicate suppression.
    pub dedup_threshold: Option<u32>,

    // Archiving
    pub create_archive: bool,
    pub archive_only: bool,
    pub archive_empty: bool,

    // Selection / run shape
    pub single_entity_id: Option<String>,
    pub single_entity_name: Option<String>,
    pub entity_concurrency: usize,
    pub debug_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_list_path: PathBuf::from("country_list.txt"),
            output_dir: PathBuf::from("images"),
            browser_engine: BrowserEngine::Chromium,
            headless: false,
            page_timeout: Duration::from_secs(30),
            browser_ws_url: None,
            chrome_path: None,
            search_url_template: DEFAULT_SEARCH_URL_TEMPLATE.to_string(),
            session_attempts: 3,
            navigation_attempts: 2,
            settle_delay: Duration::from_millis(1000),
            strategy_timeout: Duration::from_secs(20),
            click_through_limit: 10,
            scroll_rounds: 3,
            max_images: 10,
            min_width: 100,
            min_height: 100,
            download_concurrency: 4,
            download_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_multiplier: 2.0,
            request_timeout: Duration::from_secs(10),
            dedup_threshold: Some(crate::dedup::DEFAULT_SIMILARITY_THRESHOLD),
            create_archive: true,
            archive_only: false,
            archive_empty: false,
            single_entity_id: None,
            single_entity_name: None,
            entity_concurrency: 1,
            debug_logging: false,
        }
    }
}

/// On-disk TOML form. Every field is optional; unknown keys are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct FileConfig {
    target_list_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    browser_engine: Option<BrowserEngine>,
    headless: Option<bool>,
    page_timeout_secs: Option<u64>,
    browser_ws_url: Option<String>,
    chrome_path: Option<PathBuf>,
    search_url_template: Option<String>,
    session_attempts: Option<u32>,
    navigation_attempts: Option<u32>,
    settle_delay_ms: Option<u64>,
    strategy_timeout_secs: Option<u64>,
    click_through_limit: Option<usize>,
    scroll_rounds: Option<usize>,
    max_images: Option<usize>,
    min_width: Option<u32>,
    min_height: Option<u32>,
    download_concurrency: Option<usize>,
    download_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_multiplier: Option<f64>,
    request_timeout_secs: Option<u64>,
    dedup_threshold: Option<u32>,
    create_archive: Option<bool>,
    archive_only: Option<bool>,
    archive_empty: Option<bool>,
    single_entity_id: Option<String>,
    single_entity_name: Option<String>,
    entity_concurrency: Option<usize>,
    debug_logging: Option<bool>,
}

impl Config {
    /// Load from the TOML file named by `HARVEST_CONFIG`, or from the
    /// environment when it is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if an option is unknown or cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match optional_env(CONFIG_FILE_ENV) {
            Some(path) => Self::from_toml_file(Path::new(&path)),
            None => Self::from_env(),
        }
    }

    /// Load configuration from `HARVEST_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a `HARVEST_*` variable is unrecognized or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        reject_unknown_env()?;
        let d = Self::default();

        Ok(Self {
            target_list_path: PathBuf::from(env_or_default(
                "HARVEST_TARGET_LIST_PATH",
                &d.target_list_path.to_string_lossy(),
            )),
            output_dir: PathBuf::from(env_or_default(
                "HARVEST_OUTPUT_DIR",
                &d.output_dir.to_string_lossy(),
            )),

            browser_engine: parse_engine(&env_or_default(
                "HARVEST_BROWSER_ENGINE",
                d.browser_engine.as_str(),
            ))?,
            headless: parse_env_bool("HARVEST_HEADLESS", d.headless)?,
            page_timeout: Duration::from_secs(parse_env_u64(
                "HARVEST_PAGE_TIMEOUT_SECS",
                d.page_timeout.as_secs(),
            )?),
            browser_ws_url: optional_env("HARVEST_BROWSER_WS_URL"),
            chrome_path: optional_env("HARVEST_CHROME_PATH").map(PathBuf::from),
            search_url_template: env_or_default(
                "HARVEST_SEARCH_URL_TEMPLATE",
                &d.search_url_template,
            ),
            session_attempts: parse_env_u32("HARVEST_SESSION_ATTEMPTS", d.session_attempts)?,
            navigation_attempts: parse_env_u32(
                "HARVEST_NAVIGATION_ATTEMPTS",
                d.navigation_attempts,
            )?,
            settle_delay: Duration::from_millis(parse_env_u64(
                "HARVEST_SETTLE_DELAY_MS",
                d.settle_delay.as_millis() as u64,
            )?),

            strategy_timeout: Duration::from_secs(parse_env_u64(
                "HARVEST_STRATEGY_TIMEOUT_SECS",
                d.strategy_timeout.as_secs(),
            )?),
            click_through_limit: parse_env_usize(
                "HARVEST_CLICK_THROUGH_LIMIT",
                d.click_through_limit,
            )?,
            scroll_rounds: parse_env_usize("HARVEST_SCROLL_ROUNDS", d.scroll_rounds)?,

            max_images: parse_env_usize("HARVEST_MAX_IMAGES", d.max_images)?,
            min_width: parse_env_u32("HARVEST_MIN_WIDTH", d.min_width)?,
            min_height: parse_env_u32("HARVEST_MIN_HEIGHT", d.min_height)?,

            download_concurrency: parse_env_usize(
                "HARVEST_DOWNLOAD_CONCURRENCY",
                d.download_concurrency,
            )?,
            download_attempts: parse_env_u32("HARVEST_DOWNLOAD_ATTEMPTS", d.download_attempts)?,
            retry_base_delay: Duration::from_millis(parse_env_u64(
                "HARVEST_RETRY_BASE_DELAY_MS",
                d.retry_base_delay.as_millis() as u64,
            )?),
            retry_multiplier: parse_env_f64("HARVEST_RETRY_MULTIPLIER", d.retry_multiplier)?,
            request_timeout: Duration::from_secs(parse_env_u64(
                "HARVEST_REQUEST_TIMEOUT_SECS",
                d.request_timeout.as_secs(),
            )?),
            dedup_threshold: parse_dedup_threshold(optional_env("HARVEST_DEDUP_THRESHOLD"))?
                .unwrap_or(d.dedup_threshold),

            create_archive: parse_env_bool("HARVEST_CREATE_ARCHIVE", d.create_archive)?,
            archive_only: parse_env_bool("HARVEST_ARCHIVE_ONLY", d.archive_only)?,
            archive_empty: parse_env_bool("HARVEST_ARCHIVE_EMPTY", d.archive_empty)?,

            single_entity_id: optional_env("HARVEST_SINGLE_ENTITY_ID"),
            single_entity_name: optional_env("HARVEST_SINGLE_ENTITY_NAME"),
            entity_concurrency: parse_env_usize(
                "HARVEST_ENTITY_CONCURRENCY",
                d.entity_concurrency,
            )?,
            debug_logging: parse_env_bool("HARVEST_DEBUG_LOGGING", d.debug_logging)?,
        })
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, has unknown keys, or
    /// holds values of the wrong type.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown keys or mistyped values.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(contents)?;
        let d = Self::default();

        Ok(Self {
            target_list_path: file.target_list_path.unwrap_or(d.target_list_path),
            output_dir: file.output_dir.unwrap_or(d.output_dir),
            browser_engine: file.browser_engine.unwrap_or(d.browser_engine),
            headless: file.headless.unwrap_or(d.headless),
            page_timeout: file
                .page_timeout_secs
                .map_or(d.page_timeout, Duration::from_secs),
            browser_ws_url: file.browser_ws_url.filter(|s| !s.is_empty()),
            chrome_path: file.chrome_path,
            search_url_template: file.search_url_template.unwrap_or(d.search_url_template),
            session_attempts: file.session_attempts.unwrap_or(d.session_attempts),
            navigation_attempts: file.navigation_attempts.unwrap_or(d.navigation_attempts),
            settle_delay: file
                .settle_delay_ms
                .map_or(d.settle_delay, Duration::from_millis),
            strategy_timeout: file
                .strategy_timeout_secs
                .map_or(d.strategy_timeout, Duration::from_secs),
            click_through_limit: file.click_through_limit.unwrap_or(d.click_through_limit),
            scroll_rounds: file.scroll_rounds.unwrap_or(d.scroll_rounds),
            max_images: file.max_images.unwrap_or(d.max_images),
            min_width: file.min_width.unwrap_or(d.min_width),
            min_height: file.min_height.unwrap_or(d.min_height),
            download_concurrency: file.download_concurrency.unwrap_or(d.download_concurrency),
            download_attempts: file.download_attempts.unwrap_or(d.download_attempts),
            retry_base_delay: file
                .retry_base_delay_ms
                .map_or(d.retry_base_delay, Duration::from_millis),
            retry_multiplier: file.retry_multiplier.unwrap_or(d.retry_multiplier),
            request_timeout: file
                .request_timeout_secs
                .map_or(d.request_timeout, Duration::from_secs),
            dedup_threshold: match file.dedup_threshold {
                Some(0) => None,
                Some(t) => Some(t),
                None => d.dedup_threshold,
            },
            create_archive: file.create_archive.unwrap_or(d.create_archive),
            archive_only: file.archive_only.unwrap_or(d.archive_only),
            archive_empty: file.archive_empty.unwrap_or(d.archive_empty),
            single_entity_id: file.single_entity_id.filter(|s| !s.is_empty()),
            single_entity_name: file.single_entity_name.filter(|s| !s.is_empty()),
            entity_concurrency: file.entity_concurrency.unwrap_or(d.entity_concurrency),
            debug_logging: file.debug_logging.unwrap_or(d.debug_logging),
        })
    }

    /// Configuration suitable for tests: fast timeouts, no backoff sleeps,
    /// no settle delay.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            headless: true,
            page_timeout: Duration::from_secs(5),
            settle_delay: Duration::ZERO,
            strategy_timeout: Duration::from_secs(5),
            retry_base_delay: Duration::ZERO,
            retry_multiplier: 1.0,
            request_timeout: Duration::from_secs(5),
            dedup_threshold: None,
            ..Self::default()
        }
    }

    /// Validate that the options are consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid or conflicting option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.single_entity_id.is_some() && self.single_entity_name.is_some() {
            return Err(ConfigError::Conflict(
                "single_entity_id and single_entity_name cannot both be set".to_string(),
            ));
        }
        if self.archive_only && !self.create_archive {
            return Err(ConfigError::Conflict(
                "archive_only requires create_archive".to_string(),
            ));
        }
        match (self.browser_engine, self.browser_ws_url.is_some()) {
            (BrowserEngine::Remote, false) => {
                return Err(ConfigError::Conflict(
                    "browser_engine=remote requires browser_ws_url".to_string(),
                ));
            }
            (BrowserEngine::Chromium, true) => {
                return Err(ConfigError::Conflict(
                    "browser_ws_url is only used with browser_engine=remote".to_string(),
                ));
            }
            _ => {}
        }
        for (name, value) in [
            ("download_concurrency", self.download_concurrency),
            ("entity_concurrency", self.entity_concurrency),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be at least 1"));
            }
        }
        for (name, value) in [
            ("download_attempts", self.download_attempts),
            ("session_attempts", self.session_attempts),
            ("navigation_attempts", self.navigation_attempts),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be at least 1"));
            }
        }
        if self.page_timeout.is_zero() {
            return Err(invalid("page_timeout", "must be greater than zero"));
        }
        if self.strategy_timeout.is_zero() {
            return Err(invalid("strategy_timeout", "must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be greater than zero"));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(invalid("retry_multiplier", "must be a finite number >= 1.0"));
        }
        if !self.search_url_template.contains("{query}") {
            return Err(invalid(
                "search_url_template",
                "must contain the {query} placeholder",
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(invalid("output_dir", "cannot be empty"));
        }
        Ok(())
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            engine: self.browser_engine,
            headless: self.headless,
            page_timeout: self.page_timeout,
            chrome_path: self.chrome_path.clone(),
            ws_url: self.browser_ws_url.clone(),
        }
    }

    /// Backoff for relaunching a browser that failed to start or crashed.
    #[must_use]
    pub fn session_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.session_attempts,
            base_delay: self.retry_base_delay,
            multiplier: self.retry_multiplier,
            jitter: !self.retry_base_delay.is_zero(),
        }
    }

    #[must_use]
    pub fn download_policy(&self) -> DownloadPolicy {
        DownloadPolicy {
            concurrency: self.download_concurrency,
            retry: RetryPolicy {
                max_attempts: self.download_attempts,
                base_delay: self.retry_base_delay,
                multiplier: self.retry_multiplier,
                jitter: !self.retry_base_delay.is_zero(),
            },
            request_timeout: self.request_timeout,
            min_width: self.min_width,
            min_height: self.min_height,
            dedup_threshold: self.dedup_threshold,
            max_bytes: MAX_IMAGE_BYTES,
        }
    }

    #[must_use]
    pub fn filter_rules(&self) -> FilterRules {
        FilterRules {
            min_width: self.min_width,
            min_height: self.min_height,
            max_images: self.max_images,
        }
    }

    #[must_use]
    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            archive_only: self.archive_only,
            archive_empty: self.archive_empty,
        }
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn reject_unknown_env() -> Result<(), ConfigError> {
    for (key, _) in std::env::vars_os() {
        let Some(key) = key.to_str() else { continue };
        if key.starts_with(ENV_PREFIX) && !KNOWN_ENV_VARS.contains(&key) {
            return Err(ConfigError::UnknownOption(key.to_string()));
        }
    }
    Ok(())
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

/// `0` disables perceptual deduplication; an unset variable keeps the default.
fn parse_dedup_threshold(value: Option<String>) -> Result<Option<Option<u32>>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let threshold: u32 = value.parse().map_err(|e| ConfigError::ParseInt {
        name: "HARVEST_DEDUP_THRESHOLD".to_string(),
        source: e,
    })?;
    Ok(Some((threshold > 0).then_some(threshold)))
}

fn parse_engine(value: &str) -> Result<BrowserEngine, ConfigError> {
    match value.to_lowercase().as_str() {
        "chromium" | "chrome" => Ok(BrowserEngine::Chromium),
        "remote" => Ok(BrowserEngine::Remote),
        _ => Err(ConfigError::InvalidValue {
            name: "HARVEST_BROWSER_ENGINE".to_string(),
            message: format!("must be 'chromium' or 'remote', got '{value}'"),
        }),
    }
}
