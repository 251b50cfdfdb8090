//! Configuration system
//!
//! Scene-level settings (instancing growth/compaction policy, logging) with
//! TOML and RON persistence chosen by file extension.

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            Self::from_toml_str(&contents)
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            self.to_toml_string()?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Parse configuration from a TOML document
    fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Render configuration as a TOML document
    fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its accepted range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// # Instancing Configuration
///
/// Growth and compaction policy for instance group transform buffers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancingConfig {
    /// Slots reserved when a group is created
    pub initial_capacity: u32,
    /// Multiplier applied to the capacity when a group runs out of slots
    pub growth_factor: f32,
    /// Tombstone count above which a group compacts its slots
    pub tombstone_limit: u32,
    /// Clean slots tolerated between two dirty runs before they are merged
    /// into one upload
    pub upload_merge_gap: u32,
}

impl Default for InstancingConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
            growth_factor: 1.5,
            tombstone_limit: 32,
            upload_merge_gap: 4,
        }
    }
}

impl InstancingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capacity == 0 {
            return Err(ConfigError::Invalid("initial_capacity must be at least 1".to_string()));
        }
        if !(self.growth_factor > 1.0 && self.growth_factor <= 4.0) {
            return Err(ConfigError::Invalid(format!(
                "growth_factor must be in (1.0, 4.0], got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }
}

/// # Logging Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter passed to `env_logger` (overridden by `RUST_LOG`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// # Scene Configuration
///
/// Everything a `Scene` needs at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Attach a `TransformComponent` to every newly created entity
    pub create_default_transform: bool,
    /// Instance group buffer policy
    pub instancing: InstancingConfig,
    /// Logging defaults
    pub logging: LoggingConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            create_default_transform: true,
            instancing: InstancingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SceneConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instancing.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Config for SceneConfig {}
