//! Desktop session detection.
//!
//! Decides whether the desktop-portal strategy is worth trying.  Only
//! Wayland sessions and sandboxed (Flatpak) apps are "portal-class": there
//! the compositor or sandbox blocks direct global key access and the portal
//! is the sanctioned way in.

use std::path::Path;

/// Kind of desktop session this process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    X11,
    Wayland,
    /// Running inside a Flatpak sandbox, whatever the host session is.
    Sandboxed,
    Unknown,
}

impl SessionKind {
    /// Detect from the real process environment.
    pub fn detect() -> Self {
        Self::detect_from(
            |name| std::env::var(name).ok(),
            Path::new("/.flatpak-info").exists(),
        )
    }

    /// Detect from an arbitrary environment lookup.
    pub fn detect_from(env: impl Fn(&str) -> Option<String>, flatpak_info_exists: bool) -> Self {
        let set = |name: &str| env(name).is_some_and(|v| !v.is_empty());

        if flatpak_info_exists || set("FLATPAK_ID") {
            return SessionKind::Sandboxed;
        }
        match env("XDG_SESSION_TYPE").map(|v| v.to_lowercase()).as_deref() {
            Some("wayland") => return SessionKind::Wayland,
            Some("x11") => return SessionKind::X11,
            _ => {}
        }
        if set("WAYLAND_DISPLAY") {
            SessionKind::Wayland
        } else if set("DISPLAY") {
            SessionKind::X11
        } else {
            SessionKind::Unknown
        }
    }

    pub fn is_portal_class(self) -> bool {
        matches!(self, SessionKind::Wayland | SessionKind::Sandboxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn detect(vars: &[(&str, &str)], flatpak: bool) -> SessionKind {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionKind::detect_from(|name| map.get(name).cloned(), flatpak)
    }

    #[test]
    fn session_type_variable_wins() {
        assert_eq!(detect(&[("XDG_SESSION_TYPE", "wayland")], false), SessionKind::Wayland);
        assert_eq!(
            detect(&[("XDG_SESSION_TYPE", "x11"), ("WAYLAND_DISPLAY", "wayland-0")], false),
            SessionKind::X11
        );
    }

    #[test]
    fn falls_back_to_display_variables() {
        assert_eq!(detect(&[("WAYLAND_DISPLAY", "wayland-0")], false), SessionKind::Wayland);
        assert_eq!(detect(&[("DISPLAY", ":0")], false), SessionKind::X11);
        assert_eq!(detect(&[("DISPLAY", "")], false), SessionKind::Unknown);
    }

    #[test]
    fn sandbox_overrides_everything() {
        assert_eq!(detect(&[("XDG_SESSION_TYPE", "x11")], true), SessionKind::Sandboxed);
        assert_eq!(detect(&[("FLATPAK_ID", "org.example.App")], false), SessionKind::Sandboxed);
    }

    #[test]
    fn portal_class() {
        assert!(SessionKind::Wayland.is_portal_class());
        assert!(SessionKind::Sandboxed.is_portal_class());
        assert!(!SessionKind::X11.is_portal_class());
        assert!(!SessionKind::Unknown.is_portal_class());
    }
}
