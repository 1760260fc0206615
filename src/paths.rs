//! Application path management for dev, portable and installed modes.
//!
//! - **Dev mode** (debug builds only): `config.yaml` in the current working
//!   directory wins, with state and logs next to it.
//! - **Portable mode**: a `.portable` marker next to the executable keeps
//!   every file in that directory.
//! - **Installed mode** (default): files live in the platform data directory
//!   under `MIDI Router`.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used in installed mode
const APP_NAME: &str = "MIDI Router";

const CONFIG_FILE: &str = "config.yaml";
const PORTABLE_MARKER: &str = ".portable";

/// How the paths were chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Dev,
    Portable,
    Installed,
}

/// Application paths for config, state, and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config: PathBuf,
    /// Settings database lives here
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub mode: PathMode,
}

impl AppPaths {
    /// Detect the paths for this process.
    ///
    /// Runs before logging is set up, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let data_dir = dirs::data_dir();

        let paths = Self::resolve(&cwd, &exe_dir, data_dir.as_deref(), cfg!(debug_assertions));

        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] {:?} mode, base dir {}",
            paths.mode,
            paths.base_dir().display()
        );

        paths
    }

    /// Pure path selection used by `detect`
    pub fn resolve(cwd: &Path, exe_dir: &Path, data_dir: Option<&Path>, dev_build: bool) -> Self {
        if dev_build && cwd.join(CONFIG_FILE).exists() {
            return Self::in_dir(cwd, ".state", PathMode::Dev);
        }

        if exe_dir.join(PORTABLE_MARKER).exists() {
            return Self::in_dir(exe_dir, ".state", PathMode::Portable);
        }

        let base = match data_dir {
            Some(dir) => dir.join(APP_NAME),
            None => {
                eprintln!("[paths] WARNING: no platform data dir, falling back to exe dir");
                exe_dir.join(APP_NAME)
            }
        };
        Self::in_dir(&base, "state", PathMode::Installed)
    }

    fn in_dir(base: &Path, state: &str, mode: PathMode) -> Self {
        Self {
            config: base.join(CONFIG_FILE),
            state_dir: base.join(state),
            logs_dir: base.join("logs"),
            mode,
        }
    }

    pub fn is_portable(&self) -> bool {
        self.mode != PathMode::Installed
    }

    /// Directory holding the config file
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the config, state and logs directories if missing
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [self.base_dir(), self.state_dir.clone(), self.logs_dir.clone()] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    /// Sled database holding persisted settings
    pub fn settings_db_path(&self) -> PathBuf {
        self.state_dir.join("settings.sled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dev_mode_needs_config_in_cwd() {
        let cwd = tempdir().unwrap();
        let exe = tempdir().unwrap();
        let data = tempdir().unwrap();

        let paths = AppPaths::resolve(cwd.path(), exe.path(), Some(data.path()), true);
        assert_eq!(paths.mode, PathMode::Installed);

        std::fs::write(cwd.path().join("config.yaml"), "{}").unwrap();
        let paths = AppPaths::resolve(cwd.path(), exe.path(), Some(data.path()), true);
        assert_eq!(paths.mode, PathMode::Dev);
        assert_eq!(paths.config, cwd.path().join("config.yaml"));
        assert_eq!(paths.state_dir, cwd.path().join(".state"));

        // Release builds ignore the cwd config
        let paths = AppPaths::resolve(cwd.path(), exe.path(), Some(data.path()), false);
        assert_eq!(paths.mode, PathMode::Installed);
    }

    #[test]
    fn test_portable_marker() {
        let cwd = tempdir().unwrap();
        let exe = tempdir().unwrap();
        std::fs::write(exe.path().join(".portable"), "").unwrap();

        let paths = AppPaths::resolve(cwd.path(), exe.path(), None, false);
        assert_eq!(paths.mode, PathMode::Portable);
        assert!(paths.is_portable());
        assert_eq!(paths.logs_dir, exe.path().join("logs"));
    }

    #[test]
    fn test_installed_layout() {
        let cwd = tempdir().unwrap();
        let exe = tempdir().unwrap();
        let data = tempdir().unwrap();

        let paths = AppPaths::resolve(cwd.path(), exe.path(), Some(data.path()), false);
        let base = data.path().join("MIDI Router");
        assert_eq!(paths.config, base.join("config.yaml"));
        assert_eq!(paths.settings_db_path(), base.join("state").join("settings.sled"));
        assert!(!paths.is_portable());

        paths.ensure_directories().unwrap();
        assert!(paths.state_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
    }
}
