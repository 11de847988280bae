//! Feeder configuration management
//!
//! Settings come from TOML files and are then overridden by the command
//! line. Without `--config`, the system-wide file is read first and the
//! per-user file is layered on top of it key by key:
//!
//! ```toml
//! [watchdog]
//! timer = 180
//! vendor_id = "0x5131"
//! product_id = "0x2007"
//!
//! [output]
//! quiet = false
//! nowarn = false
//! debug = false
//! ```

use anyhow::{Context, Result};
use protocol::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, DeviceIdentity, TimerIssue, TimerValue};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// System-wide configuration file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/usb-watchdog/config.toml";

const APP_DIR: &str = "usb-watchdog";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    pub watchdog: WatchdogSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    /// Requested timer in seconds, normalized at start-up
    pub timer: i64,
    #[serde(with = "usb_id_serde")]
    pub vendor_id: u16,
    #[serde(with = "usb_id_serde")]
    pub product_id: u16,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            timer: i64::from(TimerValue::DEFAULT.as_seconds()),
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Hide the indicator and everything below error level
    pub quiet: bool,
    /// Skip the warning about timers under 120 seconds
    pub nowarn: bool,
    /// Log protocol-level detail
    pub debug: bool,
}

/// USB IDs as either integers or "0x…"/decimal strings; written back as hex
mod usb_id_serde {
    use protocol::parse_usb_id;
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    pub fn serialize<S>(id: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#06x}", id))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => u16::try_from(n)
                .map_err(|_| de::Error::custom(format!("USB ID {} is out of range", n))),
            RawId::Text(s) => parse_usb_id(&s).map_err(de::Error::custom),
        }
    }
}

/// Result of a layered load
#[derive(Debug, Default)]
pub struct LoadedConfig {
    pub config: FeederConfig,
    /// Files that contributed, in the order they were applied
    pub sources: Vec<PathBuf>,
    /// Files that exist but could not be used, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Values given on the command line; `None`/`false` leaves the file value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub timer: Option<i64>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub quiet: bool,
    pub nowarn: bool,
    pub debug: bool,
}

impl FeederConfig {
    /// Load configuration
    ///
    /// An explicit `path` is read on its own and any problem with it is an
    /// error. Otherwise the standard locations are layered and unusable
    /// files are reported in [`LoadedConfig::skipped`].
    pub fn load(path: Option<&Path>) -> Result<LoadedConfig> {
        match path {
            Some(path) => {
                let path = expand_path(path);
                let config = Self::load_file(&path)?;
                Ok(LoadedConfig {
                    config,
                    sources: vec![path],
                    skipped: Vec::new(),
                })
            }
            None => Ok(Self::load_layered(&Self::search_paths())),
        }
    }

    /// Read and validate a single file
    pub fn load_file(path: &Path) -> Result<Self> {
        let table = read_table(path)?;
        into_config(table)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Merge `paths` in order, later files winning key by key
    pub fn load_layered(paths: &[PathBuf]) -> LoadedConfig {
        let mut merged = toml::Table::new();
        let mut loaded = LoadedConfig::default();

        for path in paths.iter().filter(|p| p.exists()) {
            let layer = read_table(path).and_then(|table| {
                // Validate the layer alone so one bad file cannot poison the merge
                into_config(table.clone())?;
                Ok(table)
            });

            match layer {
                Ok(table) => {
                    merge_tables(&mut merged, table);
                    loaded.sources.push(path.clone());
                }
                Err(e) => loaded.skipped.push((path.clone(), format!("{:#}", e))),
            }
        }

        match into_config(merged) {
            Ok(config) => loaded.config = config,
            Err(e) => {
                // Each layer was valid on its own, so this is not expected
                loaded.skipped.push((PathBuf::from("<merged>"), format!("{:#}", e)));
            }
        }

        loaded
    }

    /// Standard locations, lowest priority first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_DIR).join(CONFIG_FILE));
        }
        paths
    }

    /// Per-user configuration file, used by `--save-config`
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join(APP_DIR).join(CONFIG_FILE)
        } else {
            PathBuf::from(".config").join(APP_DIR).join(CONFIG_FILE)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn with_overrides(mut self, cli: &CliOverrides) -> Self {
        if let Some(timer) = cli.timer {
            self.watchdog.timer = timer;
        }
        if let Some(vendor_id) = cli.vendor_id {
            self.watchdog.vendor_id = vendor_id;
        }
        if let Some(product_id) = cli.product_id {
            self.watchdog.product_id = product_id;
        }
        self.output.quiet |= cli.quiet;
        self.output.nowarn |= cli.nowarn;
        self.output.debug |= cli.debug;
        self
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.watchdog.vendor_id, self.watchdog.product_id)
    }

    /// Whether the short-timer warning is suppressed; quiet implies it
    pub fn suppress_short_timer_warning(&self) -> bool {
        self.output.nowarn || self.output.quiet
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    content
        .parse::<toml::Table>()
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn into_config(table: toml::Table) -> Result<FeederConfig> {
    Ok(toml::Value::Table(table).try_into()?)
}

/// Recursively overlay `overlay` onto `base`
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path.to_path_buf(),
    }
}

/// Turn a requested timer in seconds into the value sent to the module
///
/// Out-of-range values are replaced by the 180-second default and logged as
/// errors. Short but valid values draw a warning unless `nowarn` is set.
pub fn normalize_timer(seconds: i64, nowarn: bool) -> TimerValue {
    let setting = TimerValue::from_seconds(seconds);

    match setting.issue {
        Some(TimerIssue::BelowMinimum { requested_secs }) => {
            tracing::debug!("Requested timer of {} seconds rejected", requested_secs);
            tracing::error!(
                "Timer values under 10 seconds are invalid. Using 180 seconds (3 minutes) instead."
            );
        }
        Some(TimerIssue::AboveMaximum { requested_secs }) => {
            tracing::debug!("Requested timer of {} seconds rejected", requested_secs);
            tracing::error!(
                "Timer values over 1270 seconds (~21 minutes) are invalid. Using 180 seconds (3 minutes) instead."
            );
        }
        Some(TimerIssue::Unwise { .. }) if !nowarn => {
            tracing::warn!("Timer values under 120 seconds (2 minutes) are unwise!");
        }
        Some(TimerIssue::Unwise { .. }) | None => {}
    }

    let value = setting.value;
    tracing::debug!(
        "Timer value: {} (human)   {} (internal)   {:#x} (internal, hex)",
        value.as_seconds(),
        value.units(),
        value.command_byte()
    );

    value
}
