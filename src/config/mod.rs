//! Configuration for the push-to-talk service.
//!
//! Provides `AppConfig` (top-level settings) with its `PttConfig` and
//! `TimingConfig` sections, `AppPaths` for the platform config directory,
//! and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, Mode, PttConfig, TimingConfig, MAX_RELEASE_DELAY_MS};
