use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default upper bound on `series.count`
pub const DEFAULT_MAX_SERIES_COUNT: u32 = 10_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required env var: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Process-wide configuration, read once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub internal_api_key: String,
    pub storage: StorageConfig,
    pub fonts: FontConfig,
    pub limits: LimitsConfig,
}

/// Where templates are read from and PDFs are written to.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    S3(S3Config),
    Local { root: PathBuf },
}

#[derive(Clone, PartialEq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores; path-style addressing is used when set
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontConfig {
    /// Extra directory of .ttf/.otf/.ttc files
    pub fonts_dir: Option<PathBuf>,
    pub load_system_fonts: bool,
    /// Family used when a requested font cannot be resolved
    pub default_family: Option<String>,
    /// Fail instead of falling back when a font cannot be resolved
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitsConfig {
    pub render_timeout: Duration,
    pub max_series_count: u32,
    pub max_body_bytes: usize,
    pub preview_dpi: f32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            fonts_dir: None,
            load_system_fonts: true,
            default_family: None,
            strict: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(120),
            max_series_count: DEFAULT_MAX_SERIES_COUNT,
            max_body_bytes: 25 * 1024 * 1024,
            preview_dpi: 150.0,
        }
    }
}

/// Wraps a variable lookup so that empty values count as unset.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.optional(key) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.optional(key) {
            None => Ok(None),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::Invalid { key, value }),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let port = match env.parsed::<u16>("PORT")? {
            Some(port) => port,
            None => env.parsed::<u16>("SERVICE_PORT")?.unwrap_or(9000),
        };

        let storage = match env.optional("STORAGE_DIR") {
            Some(dir) => StorageConfig::Local {
                root: PathBuf::from(dir),
            },
            None => StorageConfig::S3(S3Config {
                bucket: env.required("S3_BUCKET")?,
                region: env.required("S3_REGION")?,
                endpoint: env
                    .optional("S3_ENDPOINT")
                    .map(|e| e.trim_end_matches('/').to_string()),
                access_key_id: env.required("S3_ACCESS_KEY_ID")?,
                secret_access_key: env.required("S3_SECRET_ACCESS_KEY")?,
            }),
        };

        Ok(Self {
            app_env: env
                .optional("APP_ENV")
                .unwrap_or_else(|| "development".to_string()),
            port,
            internal_api_key: env.required("INTERNAL_API_KEY")?,
            storage,
            fonts: FontConfig::read(&env)?,
            limits: LimitsConfig::read(&env)?,
        })
    }
}

impl FontConfig {
    /// Font settings only; used by the offline CLI commands
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        Self::read(&Env(lookup))
    }

    fn read<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            fonts_dir: env.optional("FONTS_DIR").map(PathBuf::from),
            load_system_fonts: env
                .flag("LOAD_SYSTEM_FONTS")?
                .unwrap_or(defaults.load_system_fonts),
            default_family: env.optional("DEFAULT_FONT_FAMILY"),
            strict: env.flag("STRICT_FONTS")?.unwrap_or(defaults.strict),
        })
    }
}

impl LimitsConfig {
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        Self::read(&Env(lookup))
    }

    fn read<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let render_timeout = env
            .parsed::<u64>("RENDER_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.render_timeout);
        if render_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RENDER_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        let preview_dpi = env
            .parsed::<f32>("PREVIEW_DPI")?
            .unwrap_or(defaults.preview_dpi);
        if !(preview_dpi.is_finite() && preview_dpi > 0.0) {
            return Err(ConfigError::Invalid {
                key: "PREVIEW_DPI",
                value: preview_dpi.to_string(),
            });
        }

        Ok(Self {
            render_timeout,
            max_series_count: env
                .parsed("MAX_SERIES_COUNT")?
                .unwrap_or(defaults.max_series_count),
            max_body_bytes: env
                .parsed("MAX_BODY_BYTES")?
                .unwrap_or(defaults.max_body_bytes),
            preview_dpi,
        })
    }
}
