//! Runtime configuration loaded from `weightsync.toml`.
//!
//! Every key is optional. The file is read from `--config` when given,
//! otherwise from the platform configuration directory resolved through
//! `directories-next`; a missing default file simply yields the defaults.
//! Command-line flags override what the file says.

use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;
use weightsync_fetcher::auth::Credentials;
use weightsync_fetcher::ledger::DEFAULT_LEDGER_FILENAME;
use weightsync_fetcher::listing::DEFAULT_ENDPOINT;

/// Configuration file name looked up in the platform config directory.
pub const CONFIG_FILENAME: &str = "weightsync.toml";

const MIN_ATTEMPTS: u32 = 1;
const MAX_ATTEMPTS: u32 = 10;

/// Failures while locating or parsing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path that was read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid TOML for [`SharedConfig`].
    #[error("invalid config {path}: {message}")]
    Parse {
        /// Path that was parsed.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// Neither configuration nor the platform supplies a models directory.
    #[error("no models directory configured; pass --models-dir or set models_dir")]
    NoModelsDir,
}

/// Settings shared by every subcommand.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SharedConfig {
    /// Root directory all artifacts are written beneath.
    pub models_dir: Option<String>,
    /// Ledger file; defaults to `models.ini` inside the models directory.
    pub ledger_path: Option<String>,
    /// Transfer attempts per file, clamped to `1..=10`.
    pub max_attempts: u32,
    /// Whether reconciliation skips file entries already on disk.
    pub skip_existing: bool,
    /// Base URL of the Hugging Face Hub.
    pub huggingface_endpoint: String,
    /// Timeout for each tree listing request, in seconds.
    pub listing_timeout_secs: u64,
    /// Base filenames excluded from every mirror.
    pub exclude: Vec<String>,
    /// Environment variable holding the Hugging Face token.
    pub huggingface_token_env: String,
    /// Environment variable holding the CivitAI token.
    pub civitai_token_env: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            ledger_path: None,
            max_attempts: 3,
            skip_existing: true,
            huggingface_endpoint: DEFAULT_ENDPOINT.to_owned(),
            listing_timeout_secs: 30,
            exclude: Vec::new(),
            huggingface_token_env: "HF_TOKEN".to_owned(),
            civitai_token_env: "CIVITAI_API_TOKEN".to_owned(),
        }
    }
}

impl SharedConfig {
    /// Load configuration from `explicit`, or from the platform default.
    ///
    /// An explicit path must exist. The default path may be absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn load(explicit: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_with(path, read_required),
            None => match default_config_path() {
                Some(path) => Self::load_with(&path, read_optional),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration through `reader`, which returns the file text or
    /// `None` when there is nothing to read. Tests inject the text here
    /// instead of touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns whatever `reader` returns, or [`ConfigError::Parse`].
    pub fn load_with<F>(path: &Utf8Path, reader: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&Utf8Path) -> Result<Option<String>, ConfigError>,
    {
        match reader(path)? {
            Some(text) => toml::from_str(&text).map_err(|err| ConfigError::Parse {
                path: path.to_owned(),
                message: err.message().to_owned(),
            }),
            None => Ok(Self::default()),
        }
    }

    /// `cli_override` or the configured bound, clamped to `1..=10`.
    #[must_use]
    pub fn attempts(&self, cli_override: Option<u32>) -> u32 {
        cli_override
            .unwrap_or(self.max_attempts)
            .clamp(MIN_ATTEMPTS, MAX_ATTEMPTS)
    }

    /// Resolve the models directory: `cli_override`, then `models_dir`,
    /// then the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoModelsDir`] when nothing supplies one.
    pub fn models_dir(
        &self,
        cli_override: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(dir) = cli_override {
            return Ok(dir.to_owned());
        }
        if let Some(dir) = non_blank(self.models_dir.as_deref()) {
            return Ok(Utf8PathBuf::from(dir));
        }
        project_dirs()
            .and_then(|dirs| Utf8PathBuf::try_from(dirs.data_dir().to_path_buf()).ok())
            .map(|dir| dir.join("models"))
            .ok_or(ConfigError::NoModelsDir)
    }

    /// Resolve the ledger path: `cli_override`, then `ledger_path`, then
    /// `models.ini` inside `models_dir`.
    #[must_use]
    pub fn ledger_path(
        &self,
        cli_override: Option<&Utf8Path>,
        models_dir: &Utf8Path,
    ) -> Utf8PathBuf {
        cli_override
            .map(Utf8Path::to_owned)
            .or_else(|| non_blank(self.ledger_path.as_deref()).map(Utf8PathBuf::from))
            .unwrap_or_else(|| models_dir.join(DEFAULT_LEDGER_FILENAME))
    }

    /// The Hub endpoint without a trailing slash.
    #[must_use]
    pub fn huggingface_endpoint(&self) -> &str {
        non_blank(Some(self.huggingface_endpoint.as_str()))
            .map_or(DEFAULT_ENDPOINT, |endpoint| endpoint.trim_end_matches('/'))
    }

    /// Timeout applied to each tree listing request.
    #[must_use]
    pub const fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    /// Build credentials by looking up the configured variable names with
    /// `lookup`.
    #[must_use]
    pub fn credentials<F>(&self, lookup: F) -> Credentials
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| non_blank(Some(name)).and_then(&lookup);
        Credentials {
            huggingface: read(&self.huggingface_token_env),
            civitai: read(&self.civitai_token_env),
        }
    }
}

/// The platform configuration file path, when a home directory is known.
#[must_use]
pub fn default_config_path() -> Option<Utf8PathBuf> {
    project_dirs()
        .and_then(|dirs| Utf8PathBuf::try_from(dirs.config_dir().to_path_buf()).ok())
        .map(|dir| dir.join(CONFIG_FILENAME))
}

fn project_dirs() -> Option<directories_next::ProjectDirs> {
    directories_next::ProjectDirs::from("", "", "weightsync")
}

fn read_required(path: &Utf8Path) -> Result<Option<String>, ConfigError> {
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_owned(),
            source,
        }),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(source: &str) -> Result<SharedConfig, ConfigError> {
        let owned = source.to_owned();
        SharedConfig::load_with(Utf8Path::new("weightsync.toml"), move |_| Ok(Some(owned)))
    }

    #[rstest]
    fn defaults_match_the_documented_baseline() {
        let config = SharedConfig::default();

        assert_eq!(config.attempts(None), 3);
        assert!(config.skip_existing);
        assert_eq!(config.huggingface_endpoint(), "https://huggingface.co");
        assert_eq!(config.listing_timeout(), Duration::from_secs(30));
        assert!(config.exclude.is_empty());
    }

    #[rstest]
    fn deserialises_overrides_from_toml() {
        let config = parse(concat!(
            "models_dir = \"/srv/models\"\n",
            "max_attempts = 5\n",
            "skip_existing = false\n",
            "exclude = [\"README.md\", \".gitattributes\"]\n",
        ))
        .expect("expected configuration to parse successfully");

        assert_eq!(config.attempts(None), 5);
        assert!(!config.skip_existing);
        assert_eq!(config.exclude, vec!["README.md", ".gitattributes"]);
        assert_eq!(
            config.models_dir(None).expect("models dir"),
            Utf8PathBuf::from("/srv/models")
        );
    }

    #[rstest]
    #[case::zero(0, 1)]
    #[case::in_range(7, 7)]
    #[case::too_many(50, 10)]
    fn clamps_attempts(#[case] configured: u32, #[case] expected: u32) {
        let config = SharedConfig {
            max_attempts: configured,
            ..SharedConfig::default()
        };
        assert_eq!(config.attempts(None), expected);
    }

    #[rstest]
    fn command_line_attempts_are_clamped_too() {
        let config = SharedConfig::default();
        assert_eq!(config.attempts(Some(0)), 1);
        assert_eq!(config.attempts(Some(4)), 4);
        assert_eq!(config.attempts(None), 3);
    }

    #[rstest]
    fn rejects_unknown_fields() {
        let outcome = parse("unexpected = true\n");

        assert!(
            matches!(outcome, Err(ConfigError::Parse { .. })),
            "expected a parse error when unknown fields are present"
        );
    }

    #[rstest]
    fn propagates_type_errors() {
        let outcome = parse("max_attempts = \"many\"\n");
        assert!(matches!(outcome, Err(ConfigError::Parse { .. })));
    }

    #[rstest]
    fn missing_default_file_yields_defaults() {
        let config =
            SharedConfig::load_with(Utf8Path::new("absent.toml"), |_| Ok(None)).expect("defaults");
        assert_eq!(config, SharedConfig::default());
    }

    #[rstest]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("UTF-8 path");
        let outcome = SharedConfig::load(Some(&root.join("nope.toml")));
        assert!(matches!(outcome, Err(ConfigError::Read { .. })));
    }

    #[rstest]
    fn explicit_file_is_read() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("UTF-8 path");
        let path = root.join(CONFIG_FILENAME);
        std::fs::write(&path, "listing_timeout_secs = 5\n").expect("write config");

        let config = SharedConfig::load(Some(&path)).expect("config");
        assert_eq!(config.listing_timeout(), Duration::from_secs(5));
    }

    #[rstest]
    #[case::cli(Some("/cli/ledger.ini"), None, "/cli/ledger.ini")]
    #[case::configured(None, Some("/etc/ledger.ini"), "/etc/ledger.ini")]
    #[case::blank_configured(None, Some("  "), "/models/models.ini")]
    #[case::default(None, None, "/models/models.ini")]
    fn ledger_path_precedence(
        #[case] cli: Option<&str>,
        #[case] configured: Option<&str>,
        #[case] expected: &str,
    ) {
        let config = SharedConfig {
            ledger_path: configured.map(str::to_owned),
            ..SharedConfig::default()
        };
        let path = config.ledger_path(cli.map(Utf8Path::new), Utf8Path::new("/models"));
        assert_eq!(path, Utf8PathBuf::from(expected));
    }

    #[rstest]
    fn models_dir_prefers_the_command_line() {
        let config = SharedConfig {
            models_dir: Some("/configured".to_owned()),
            ..SharedConfig::default()
        };
        let dir = config
            .models_dir(Some(Utf8Path::new("/flag")))
            .expect("models dir");
        assert_eq!(dir, Utf8PathBuf::from("/flag"));
    }

    #[rstest]
    fn trailing_slash_is_trimmed_from_endpoint() {
        let config = SharedConfig {
            huggingface_endpoint: "https://mirror.example/".to_owned(),
            ..SharedConfig::default()
        };
        assert_eq!(config.huggingface_endpoint(), "https://mirror.example");
    }

    #[rstest]
    fn credentials_read_the_named_variables() {
        let config = SharedConfig {
            civitai_token_env: "MY_CIVITAI".to_owned(),
            ..SharedConfig::default()
        };
        let credentials = config.credentials(|name| match name {
            "HF_TOKEN" => Some("hf_secret".to_owned()),
            "MY_CIVITAI" => Some("civ_secret".to_owned()),
            _ => None,
        });
        assert_eq!(credentials.huggingface.as_deref(), Some("hf_secret"));
        assert_eq!(credentials.civitai.as_deref(), Some("civ_secret"));
    }
}
