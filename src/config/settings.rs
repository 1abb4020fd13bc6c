//! Settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`.
//! Every field has a default, so a partial `settings.toml` still loads.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Upper bound applied to `pushToTalkReleaseDelay`.
pub const MAX_RELEASE_DELAY_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How key edges map onto the talk-active state.
///
/// | Variant | Key down         | Key up       |
/// |---------|------------------|--------------|
/// | Hold    | activate         | deactivate   |
/// | Toggle  | flip             | ignored      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Hold,
    Toggle,
}

// ---------------------------------------------------------------------------
// PttConfig
// ---------------------------------------------------------------------------

/// Push-to-talk settings as exchanged with the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PttConfig {
    /// Master switch.
    pub push_to_talk: bool,
    /// Accelerator string, e.g. `"Shift+V"`.
    pub push_to_talk_keybind: String,
    pub push_to_talk_mode: Mode,
    /// Milliseconds to keep talking after a Hold-mode release.
    pub push_to_talk_release_delay: u64,
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            push_to_talk: false,
            push_to_talk_keybind: "Shift+V".into(),
            push_to_talk_mode: Mode::Hold,
            push_to_talk_release_delay: 0,
        }
    }
}

impl PttConfig {
    /// Release delay, clamped to `0..=MAX_RELEASE_DELAY_MS`.
    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.push_to_talk_release_delay.min(MAX_RELEASE_DELAY_MS))
    }
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Timer constants of the hold emulation and the low-level hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long a native shortcut trigger keeps talk active without a
    /// re-trigger (key repeat).
    pub rearm_timeout_ms: u64,
    /// Minimum time talk stays active once activated.
    pub min_hold_ms: u64,
    /// How long the low-level hook waits for an immediate start-up failure.
    pub hook_startup_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rearm_timeout_ms: 400,
            min_hold_ms: 600,
            hook_startup_grace_ms: 150,
        }
    }
}

impl TimingConfig {
    pub fn rearm_timeout(&self) -> Duration {
        Duration::from_millis(self.rearm_timeout_ms)
    }

    pub fn min_hold(&self) -> Duration {
        Duration::from_millis(self.min_hold_ms)
    }

    pub fn hook_startup_grace(&self) -> Duration {
        Duration::from_millis(self.hook_startup_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use talkgate::config::AppConfig;
///
/// // Returns Default when the file is missing.
/// let mut config = AppConfig::load().unwrap();
/// config.ptt.push_to_talk = true;
/// config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ptt: PttConfig,
    pub timing: TimingConfig,
}

impl AppConfig {
    /// Load from the platform `settings.toml`, or defaults on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to the platform `settings.toml`, creating parent directories as
    /// needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
