//! Settings parser for .droidherd/config.toml

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use droidherd_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const DROIDHERD_DIR: &str = ".droidherd";

/// All engine settings, section by section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub bridge: BridgeSettings,
    pub game: GameSettings,
    pub batch: BatchSettings,
    pub matching: MatchingSettings,
    pub storage: StorageSettings,
}

/// `[bridge]` - how we talk to the platform tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Name or path of the adb binary.
    pub adb_path: String,
    /// Seconds between device registry polls.
    pub poll_interval_secs: u64,
    /// Transient-failure retries per bridge command.
    pub command_retries: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            poll_interval_secs: 5,
            command_retries: 3,
        }
    }
}

/// `[game]` - the target application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Package of the game under automation. Must be configured before
    /// `start_game` / `restart_game` steps can run.
    pub package: String,
    /// Optional explicit activity. Empty means launcher-resolution.
    pub activity: String,
    /// Where account state files land on the device. The path the target
    /// game reads its account state from; confirm per target app.
    pub account_remote_path: String,
    /// Seconds to wait after a (re)start for the game's cold start.
    pub cold_start_wait_secs: f64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            package: String::new(),
            activity: String::new(),
            account_remote_path: "/sdcard/droidherd_account.xml".to_string(),
            cold_start_wait_secs: 3.0,
        }
    }
}

impl GameSettings {
    pub fn activity_opt(&self) -> Option<&str> {
        if self.activity.is_empty() {
            None
        } else {
            Some(&self.activity)
        }
    }
}

/// `[batch]` - account batch behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Extension of account files in the source folder.
    pub extension: String,
    /// Move successfully processed files into the done folder.
    pub move_on_complete: bool,
    /// Destination for processed files. Empty means `<source>/done/`.
    pub done_folder: String,
    /// Pause between accounts on one device.
    pub delay_between_accounts_secs: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            extension: "xml".to_string(),
            move_on_complete: true,
            done_folder: String::new(),
            delay_between_accounts_secs: 2.0,
        }
    }
}

impl BatchSettings {
    pub fn done_folder_opt(&self) -> Option<PathBuf> {
        if self.done_folder.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.done_folder))
        }
    }
}

/// `[matching]` - template matching defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Default confidence threshold for steps that do not set their own.
    pub threshold: f32,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

/// `[storage]` - where workflows and templates live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// Data directory. Empty means the platform-local data dir.
    pub data_dir: String,
}

impl StorageSettings {
    pub fn data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("droidherd")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.data_dir().join("workflows")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir().join("templates")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config File Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// The commented starter config written by `droidherd init`.
const STARTER_CONFIG: &str = r#"# droidherd configuration

[bridge]
adb_path = "adb"        # Name or path of the adb binary
poll_interval_secs = 5  # Seconds between device polls
command_retries = 3     # Transient-failure retries per command

[game]
package = ""            # Target package, e.g. "com.example.game"
activity = ""           # Empty = resolve through the launcher
account_remote_path = "/sdcard/droidherd_account.xml"
cold_start_wait_secs = 3.0

[batch]
extension = "xml"       # Account file extension
move_on_complete = true # Move processed files to the done folder
done_folder = ""        # Empty = <source>/done/
delay_between_accounts_secs = 2.0

[matching]
threshold = 0.8         # Default template match confidence

[storage]
data_dir = ""           # Empty = platform data dir
"#;

fn config_path(base_path: &Path) -> PathBuf {
    base_path.join(DROIDHERD_DIR).join(CONFIG_FILENAME)
}

/// Read settings from `<base>/.droidherd/config.toml`.
///
/// A missing or unparseable file yields `Settings::default()`; a bad config
/// must never keep the tool from starting.
pub fn load_settings(base_path: &Path) -> Settings {
    let path = config_path(base_path);
    match read_config(&path) {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            debug!("no config at {}, using defaults", path.display());
            Settings::default()
        }
        Err(e) => {
            warn!("ignoring bad config {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

fn read_config(path: &Path) -> Result<Option<Settings>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let settings =
        toml::from_str(&text).map_err(|e| Error::config(format!("bad TOML: {}", e)))?;
    Ok(Some(settings))
}

/// Persist settings to `<base>/.droidherd/config.toml`.
pub fn save_settings(base_path: &Path, settings: &Settings) -> Result<()> {
    let body = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("unserializable settings: {}", e)))?;
    let content = format!("# droidherd configuration\n\n{}", body);

    write_replacing(&config_path(base_path), &content)?;
    debug!("settings saved under {}", base_path.display());
    Ok(())
}

/// Create `<base>/.droidherd/` with the commented starter config.
///
/// An existing config file is left untouched.
pub fn init_config_dir(base_path: &Path) -> Result<()> {
    let path = config_path(base_path);
    if path.exists() {
        return Ok(());
    }
    write_replacing(&path, STARTER_CONFIG)?;
    info!("wrote starter config to {}", path.display());
    Ok(())
}

/// Stage the content next to the target and rename over it, so a crash
/// mid-write cannot leave a truncated config behind.
fn write_replacing(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::config("config path has no parent directory"))?;
    std::fs::create_dir_all(dir)?;

    let staged = dir.join(".config.toml.new");
    std::fs::write(&staged, content)?;
    std::fs::rename(&staged, path)?;
    Ok(())
}
