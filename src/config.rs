//! Runtime configuration
//!
//! Resolution order, lowest to highest priority:
//! 1. built-in defaults
//! 2. TOML file (`--config`, `AUDIBLE_CONVERTER_CONFIG`, or
//!    `<config_dir>/audible-converter/config.toml`)
//! 3. command-line flags and environment variables (applied by the binary)
//!
//! A `.env` in the working directory is loaded before any of this, so its
//! variables count as environment.

use crate::api::auth::Locale;
use crate::audio::pipeline::{ConversionPipeline, ConversionSettings};
use crate::audio::transcoder::{Transcoder, TranscoderTimeouts};
use crate::crypto::aax::KeyValidator;
use crate::discovery::{
    default_launcher, AccountApiStrategy, BrowserStrategy, BrowserTimings, CliToolStrategy, FileScanStrategy,
    KeyDiscovery, KeyPrompt, KeyStrategy, ManualStrategy,
};
use crate::error::{ConverterError, Result};
use crate::storage::{KeyStore, DEFAULT_KEY_FILE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "AUDIBLE_CONVERTER_CONFIG";

/// Timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// ffprobe key checks and duration queries
    pub probe_secs: u64,
    /// audible-cli key request and HTTP calls
    pub tool_secs: u64,
    /// One ffmpeg conversion or chunk extraction
    pub conversion_secs: u64,
    /// Debug-mode browser login
    pub manual_login_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_secs: 30,
            tool_secs: 30,
            conversion_secs: 15 * 60,
            manual_login_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// HTTP listen address
    pub bind: String,
    /// Largest accepted upload body
    pub max_upload_mb: usize,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_chunk_mb: f64,
    pub min_chunk_secs: f64,
    pub bitrate: String,
    /// Where the activation bytes are persisted
    pub key_file: PathBuf,
    /// Best-effort copies of the key file
    pub key_mirrors: Vec<PathBuf>,
    /// Directory checked for bundled ffmpeg/ffprobe before `PATH`
    pub ffmpeg_dir: PathBuf,
    /// audible-cli command line; platform default when unset
    pub audible_cli: Option<String>,
    /// Default marketplace code
    pub locale: String,
    /// Visible browser with manual login
    pub debug_browser: bool,
    pub timeouts: TimeoutConfig,
    /// Replaces the built-in filesystem scan roots
    pub scan_roots: Option<Vec<PathBuf>>,
    /// Replaces the directories searched for an `.aax` to verify with
    pub verify_roots: Option<Vec<PathBuf>>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        let settings = ConversionSettings::default();
        Self {
            bind: "0.0.0.0:5000".to_string(),
            max_upload_mb: 2048,
            upload_dir: settings.upload_dir,
            output_dir: settings.output_dir,
            max_chunk_mb: settings.max_chunk_mb,
            min_chunk_secs: settings.min_chunk_secs,
            bitrate: settings.bitrate,
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            key_mirrors: dirs::home_dir()
                .map(|home| vec![home.join(DEFAULT_KEY_FILE)])
                .unwrap_or_default(),
            ffmpeg_dir: PathBuf::from("ffmpeg"),
            audible_cli: None,
            locale: "us".to_string(),
            debug_browser: false,
            timeouts: TimeoutConfig::default(),
            scan_roots: None,
            verify_roots: None,
        }
    }
}

impl ConverterConfig {
    /// `<config_dir>/audible-converter/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("audible-converter").join("config.toml"))
    }

    /// Load from `explicit`, else `$AUDIBLE_CONVERTER_CONFIG`, else the default path
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => {
                    debug!("no config file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConverterError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_chunk_mb > 0.0) {
            return Err(ConverterError::Config("max_chunk_mb must be positive".into()));
        }
        if !(self.min_chunk_secs > 0.0) {
            return Err(ConverterError::Config("min_chunk_secs must be positive".into()));
        }
        self.locale()?;
        Ok(())
    }

    pub fn locale(&self) -> Result<Locale> {
        self.locale.parse()
    }

    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(&self.key_file).with_mirrors(self.key_mirrors.clone())
    }

    pub fn transcoder(&self) -> Transcoder {
        let timeouts = TranscoderTimeouts {
            probe: Duration::from_secs(self.timeouts.probe_secs),
            conversion: Duration::from_secs(self.timeouts.conversion_secs),
            ..TranscoderTimeouts::default()
        };
        Transcoder::resolve(Some(&self.ffmpeg_dir)).with_timeouts(timeouts)
    }

    pub fn validator(&self) -> KeyValidator {
        let roots = self
            .verify_roots
            .clone()
            .unwrap_or_else(KeyValidator::default_search_roots);
        KeyValidator::new(self.transcoder(), roots)
    }

    pub fn conversion_settings(&self) -> ConversionSettings {
        ConversionSettings {
            upload_dir: self.upload_dir.clone(),
            output_dir: self.output_dir.clone(),
            max_chunk_mb: self.max_chunk_mb,
            min_chunk_secs: self.min_chunk_secs,
            bitrate: self.bitrate.clone(),
        }
    }

    pub fn pipeline(&self) -> ConversionPipeline {
        ConversionPipeline::new(self.transcoder(), self.conversion_settings()).with_key_store(self.key_store())
    }

    pub fn file_scan(&self) -> FileScanStrategy {
        let strategy = FileScanStrategy::new(self.validator());
        match &self.scan_roots {
            Some(roots) => strategy.with_roots(roots.clone()),
            None => strategy,
        }
    }

    /// The five strategies in priority order, saving to the configured key file
    pub fn key_discovery(&self, prompt: Arc<dyn KeyPrompt>) -> KeyDiscovery {
        let tool_timeout = Duration::from_secs(self.timeouts.tool_secs);

        let cli = match &self.audible_cli {
            Some(command_line) => CliToolStrategy::from_command_line(command_line),
            None => CliToolStrategy::default(),
        }
        .with_timeouts(Duration::from_secs(10), tool_timeout);

        let browser = BrowserStrategy::new(default_launcher()).with_timings(BrowserTimings {
            manual_login_timeout: Duration::from_secs(self.timeouts.manual_login_secs),
            ..BrowserTimings::default()
        });

        let strategies: Vec<Box<dyn KeyStrategy>> = vec![
            Box::new(cli),
            Box::new(AccountApiStrategy::audible(tool_timeout)),
            Box::new(browser),
            Box::new(self.file_scan()),
            Box::new(ManualStrategy::new(prompt, self.validator())),
        ];
        KeyDiscovery::new(strategies).with_store(self.key_store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Method, ProvidedKey};

    #[test]
    fn test_defaults() {
        let config = ConverterConfig::default();
        assert_eq!(config.bind, "0.0.0.0:5000");
        assert_eq!(config.max_chunk_mb, 24.0);
        assert_eq!(config.min_chunk_secs, 60.0);
        assert_eq!(config.bitrate, "128k");
        assert_eq!(config.key_file, PathBuf::from("activation_bytes.txt"));
        assert_eq!(config.timeouts.manual_login_secs, 120);
        assert_eq!(config.locale().unwrap().country_code, "us");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ConverterConfig::from_toml_str(
            r#"
            bind = "127.0.0.1:8080"
            locale = "de"
            scan_roots = ["/data/audible"]

            [timeouts]
            probe_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.locale().unwrap().domain, "audible.de");
        assert_eq!(config.timeouts.probe_secs, 5);
        assert_eq!(config.timeouts.tool_secs, 30);
        assert_eq!(config.max_chunk_mb, 24.0);
        assert_eq!(config.file_scan().roots(), &[PathBuf::from("/data/audible")]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ConverterConfig::from_toml_str("locale = \"xx\"").is_err());
        assert!(ConverterConfig::from_toml_str("max_chunk_mb = 0.0").is_err());
        assert!(matches!(
            ConverterConfig::from_toml_str("min_chunk_secs = 0.0"),
            Err(ConverterError::Config(_))
        ));
        assert!(ConverterConfig::from_toml_str("min_chunk_secs = -1.0").is_err());
        assert!(matches!(
            ConverterConfig::from_toml_str("bind = 5"),
            Err(ConverterError::Toml(_))
        ));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = ConverterConfig::load(Some(Path::new("/nonexistent/config.toml"))).unwrap_err();
        assert!(matches!(err, ConverterError::Config(_)));
    }

    #[test]
    fn test_discovery_order() {
        let discovery = ConverterConfig::default().key_discovery(Arc::new(ProvidedKey(None)));
        assert_eq!(
            discovery.methods(),
            vec![Method::Cli, Method::Auth, Method::Browser, Method::File, Method::Manual]
        );
    }
}
