use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which [`rollcall_core::Recognizer`] strategy the daemon runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerKind {
    Remote,
    Simulated,
}

impl FromStr for RecognizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "simulated" | "mock" => Ok(Self::Simulated),
            other => Err(ConfigError::Invalid(format!("unknown recognizer '{other}'"))),
        }
    }
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket address the HTTP interface binds to.
    pub listen_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root of the per-student enrollment photo folders.
    pub photo_dir: PathBuf,
    pub recognizer: RecognizerKind,
    /// Base URL of the recognition service (remote strategy only).
    pub recognizer_url: String,
    /// Bound on a single preview detection call.
    pub detect_timeout_ms: u64,
    /// Bound on feature extraction and group description calls.
    pub extract_timeout_secs: u64,
    /// Maximum Euclidean distance for an accepted match.
    pub match_threshold: f32,
    /// Floor applied to the confidence of accepted matches.
    pub min_confidence: f32,
    /// Out-of-range margin in percent of the frame.
    pub out_of_range_margin: f32,
    /// Enrollment photos per student (N).
    pub photo_count: u32,
    /// Valid photos required to finalize; defaults to `photo_count`.
    pub min_valid_photos: Option<u32>,
    /// Largest decoded image a request may carry.
    pub max_image_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            listen_addr: "127.0.0.1:5000".to_string(),
            db_path: data_dir.join("attendance.db"),
            photo_dir: data_dir.join("students"),
            recognizer: RecognizerKind::Remote,
            recognizer_url: "http://127.0.0.1:5001".to_string(),
            detect_timeout_ms: 500,
            extract_timeout_secs: 30,
            match_threshold: 0.4,
            min_confidence: 0.85,
            out_of_range_margin: 15.0,
            photo_count: 10,
            min_valid_photos: None,
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration. `path` names an optional TOML file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `ROLLCALL_*` overrides from `lookup`.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("ROLLCALL_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_PHOTO_DIR") {
            self.photo_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_RECOGNIZER") {
            self.recognizer = v.parse()?;
        }
        if let Some(v) = lookup("ROLLCALL_RECOGNIZER_URL") {
            self.recognizer_url = v;
        }
        env_parse(&lookup, "ROLLCALL_DETECT_TIMEOUT_MS", &mut self.detect_timeout_ms);
        env_parse(&lookup, "ROLLCALL_EXTRACT_TIMEOUT_SECS", &mut self.extract_timeout_secs);
        env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parse(&lookup, "ROLLCALL_MIN_CONFIDENCE", &mut self.min_confidence);
        env_parse(&lookup, "ROLLCALL_OUT_OF_RANGE_MARGIN", &mut self.out_of_range_margin);
        env_parse(&lookup, "ROLLCALL_PHOTO_COUNT", &mut self.photo_count);
        env_parse(&lookup, "ROLLCALL_MAX_IMAGE_BYTES", &mut self.max_image_bytes);
        let mut floor = self.min_valid_photos.unwrap_or(0);
        if env_parse(&lookup, "ROLLCALL_MIN_VALID_PHOTOS", &mut floor) {
            self.min_valid_photos = Some(floor);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid("match_threshold must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid("min_confidence must be within [0, 1]".into()));
        }
        if !(0.0..50.0).contains(&self.out_of_range_margin) {
            return Err(ConfigError::Invalid("out_of_range_margin must be within [0, 50)".into()));
        }
        if self.photo_count == 0 {
            return Err(ConfigError::Invalid("photo_count must be at least 1".into()));
        }
        if let Some(floor) = self.min_valid_photos {
            if floor == 0 || floor > self.photo_count {
                return Err(ConfigError::Invalid(format!(
                    "min_valid_photos must be within [1, {}]",
                    self.photo_count
                )));
            }
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::Invalid("max_image_bytes must be non-zero".into()));
        }
        if self.detect_timeout_ms == 0 || self.extract_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn min_valid_photos(&self) -> u32 {
        self.min_valid_photos.unwrap_or(self.photo_count)
    }

    /// Request body limit: a base64 data URL of `max_image_bytes` plus the
    /// surrounding JSON.
    pub fn max_body_bytes(&self) -> usize {
        self.max_image_bytes.div_ceil(3).saturating_mul(4).saturating_add(64 * 1024)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Overwrite `slot` when `key` is set and parses; returns whether it did.
fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> bool {
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(value) => {
            *slot = value;
            true
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.min_valid_photos(), 10);
        assert_eq!(config.detect_timeout(), Duration::from_millis(500));
        assert_eq!(config.recognizer, RecognizerKind::Remote);
        assert_eq!(config.max_image_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn test_body_limit_fits_base64_image() {
        let config = Config {
            max_image_bytes: 3 * 1024 * 1024,
            ..Config::default()
        };
        // 4/3 expansion plus room for the other JSON fields
        assert_eq!(config.max_body_bytes(), 4 * 1024 * 1024 + 64 * 1024);

        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[("ROLLCALL_MAX_IMAGE_BYTES", "1048576")]))
            .unwrap();
        assert_eq!(config.max_image_bytes, 1024 * 1024);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            r#"
listen_addr = "0.0.0.0:8080"
recognizer = "simulated"
photo_count = 5
min_valid_photos = 3
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.recognizer, RecognizerKind::Simulated);
        assert_eq!(config.photo_count, 5);
        assert_eq!(config.min_valid_photos(), 3);
        // untouched keys keep their defaults
        assert_eq!(config.match_threshold, 0.4);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("ROLLCALL_RECOGNIZER", "simulated"),
                ("ROLLCALL_MATCH_THRESHOLD", "0.5"),
                ("ROLLCALL_MIN_VALID_PHOTOS", "1"),
                ("ROLLCALL_DB_PATH", "/tmp/x.db"),
            ]))
            .unwrap();
        assert_eq!(config.recognizer, RecognizerKind::Simulated);
        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.min_valid_photos(), 1);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[("ROLLCALL_PHOTO_COUNT", "lots")]))
            .unwrap();
        assert_eq!(config.photo_count, 10);
    }

    #[test]
    fn test_unknown_recognizer_rejected() {
        let mut config = Config::default();
        let err = config.apply_overrides(lookup(&[("ROLLCALL_RECOGNIZER", "magic")]));
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation() {
        let bad = [
            Config {
                match_threshold: 0.0,
                ..Config::default()
            },
            Config {
                min_confidence: 1.5,
                ..Config::default()
            },
            Config {
                out_of_range_margin: 50.0,
                ..Config::default()
            },
            Config {
                photo_count: 0,
                ..Config::default()
            },
            Config {
                min_valid_photos: Some(11),
                ..Config::default()
            },
            Config {
                min_valid_photos: Some(0),
                ..Config::default()
            },
            Config {
                max_image_bytes: 0,
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }
}
