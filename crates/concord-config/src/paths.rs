//! Path utilities and XDG directory discovery.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

/// XDG-compliant paths for a Concord node.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "Concord", "concord"),
        }
    }

    /// `~/.config/concord/`
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::XdgError("failed to determine user config directory".to_string()))
    }

    /// `~/.config/concord/config.toml`
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// `<node_dir>/concord.toml`
    pub fn node_config_file(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join("concord.toml")
    }

    /// `<node_dir>/concord.local.toml` (gitignored local overrides)
    pub fn local_config_file(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join("concord.local.toml")
    }

    /// Default data directory the agent's recording log and mark file live
    /// under, relative to `node_dir`.
    pub fn data_dir(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join(".concord")
    }

    pub fn is_initialized(node_dir: impl AsRef<Path>) -> bool {
        Self::node_config_file(node_dir).exists()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn node_paths_are_relative_to_the_node_dir() {
        let temp_dir = tempdir().unwrap();
        let node_dir = temp_dir.path();

        assert_eq!(Paths::node_config_file(node_dir), node_dir.join("concord.toml"));
        assert_eq!(Paths::local_config_file(node_dir), node_dir.join("concord.local.toml"));
        assert_eq!(Paths::data_dir(node_dir), node_dir.join(".concord"));
        assert!(!Paths::is_initialized(node_dir));

        std::fs::write(Paths::node_config_file(node_dir), "member_id = 0\n").unwrap();
        assert!(Paths::is_initialized(node_dir));
    }
}
