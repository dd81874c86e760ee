use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::severity::Severity;
use crate::wait::WaitConfig;

/// Logger configuration.
///
/// Every field has a default, so a TOML document only needs to name what it
/// changes:
///
/// ```
/// use async_binary_logger::{LoggerConfig, Severity};
///
/// let config = LoggerConfig::from_toml_str(
///     r#"
///     [allocator]
///     fixed_entries = 1024
///
///     [severity]
///     stdout = "warning"
///
///     [file]
///     out_folder = "/var/log/app"
///     prefix = "app-"
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.allocator.fixed_entries, 1024);
/// assert_eq!(config.severity.stdout, Severity::Warning);
/// assert_eq!(config.file.unwrap().suffix, ".log");
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
    pub allocator: AllocatorConfig,
    pub wait: WaitSettings,
    pub severity: SeverityConfig,
    /// Stamp each entry with the producer's clock.
    pub timestamp: TimestampConfig,
    /// Rotated file output. Without it only the console is written.
    pub file: Option<FileConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocatorConfig {
    /// Slots in the fixed pool, rounded up to a power of two.
    pub fixed_entries: usize,
    /// Bytes per slot including the block prefix, rounded up to a power of two.
    pub fixed_entry_size: usize,
    /// Serve oversized entries, and entries arriving while the pool is
    /// exhausted, from the heap instead of dropping them.
    pub use_heap: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            fixed_entries: 4096,
            fixed_entry_size: 256,
            use_heap: true,
        }
    }
}

/// Serialized form of [`WaitConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitSettings {
    pub spin_max: u32,
    pub yield_max: u32,
    pub block_timeout_us: u64,
    pub never_block: bool,
}

impl Default for WaitSettings {
    fn default() -> Self {
        let wait = WaitConfig::default();
        Self {
            spin_max: wait.spin_max,
            yield_max: wait.yield_max,
            block_timeout_us: wait.block_timeout.as_micros() as u64,
            never_block: wait.never_block,
        }
    }
}

impl From<&WaitSettings> for WaitConfig {
    fn from(settings: &WaitSettings) -> Self {
        WaitConfig {
            spin_max: settings.spin_max,
            yield_max: settings.yield_max,
            block_timeout: Duration::from_micros(settings.block_timeout_us),
            never_block: settings.never_block,
        }
    }
}

/// Initial output thresholds; all three can be changed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeverityConfig {
    pub file: Severity,
    pub stdout: Severity,
    pub stderr: Severity,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            file: Severity::Debug,
            stdout: Severity::Notice,
            stderr: Severity::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimestampConfig {
    pub enabled: bool,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Where and how [`crate::RotatingFile`] writes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub out_folder: PathBuf,
    pub prefix: String,
    pub suffix: String,
    /// Rotate once a file holds this many bytes.
    pub approx_max_size: u64,
    /// Past files to keep; 0 keeps all of them.
    pub file_count: usize,
    /// Extra past files tolerated before pruning runs.
    pub delayed_file_count: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            out_folder: PathBuf::from("logs"),
            prefix: "log-".to_string(),
            suffix: ".log".to_string(),
            approx_max_size: 16 * 1024 * 1024,
            file_count: 8,
            delayed_file_count: 2,
        }
    }
}

impl LoggerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: LoggerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Rejects settings that could never produce a working logger.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alloc = &self.allocator;
        if alloc.fixed_entries == 0 && !alloc.use_heap {
            return invalid("allocator needs fixed entries or heap fallback");
        }
        if alloc.fixed_entries > 0 && alloc.fixed_entry_size < crate::allocator::BLOCK_PREFIX + 4 {
            return invalid(format!(
                "fixed_entry_size {} is below the minimum of {}",
                alloc.fixed_entry_size,
                crate::allocator::BLOCK_PREFIX + 4
            ));
        }
        for (name, severity) in [
            ("file", self.severity.file),
            ("stdout", self.severity.stdout),
            ("stderr", self.severity.stderr),
        ] {
            if severity == Severity::Invalid {
                return invalid(format!("{name} severity cannot be 'invalid'"));
            }
        }
        if let Some(file) = &self.file {
            if file.approx_max_size == 0 {
                return invalid("file.approx_max_size must be positive");
            }
            if file.prefix.is_empty() && file.suffix.is_empty() {
                return invalid("file.prefix and file.suffix cannot both be empty");
            }
        }
        Ok(())
    }

    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig::from(&self.wait)
    }
}

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid {
        message: message.into(),
    })
}
