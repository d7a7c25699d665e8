use crate::error_handling::types::ConfigError;
use log::debug;
use std::path::{Path, PathBuf};

pub const MMC_LISTEN_FILE: &str = "SERVER_UNIX_MMC_LISTEN";
pub const RULE_DOWNLOADER_LISTEN_FILE: &str = "SERVER_UNIX_RULE_DOWNLOADER_LISTEN";
pub const NETFINDER_LISTEN_FILE: &str = "SERVER_UNIX_NETFINDER_LISTEN";

/// Directory tree rooted at `$HOME/<start_dir>/`.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeLayout {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub log_dir: PathBuf,
    pub system_dir: PathBuf,
    pub unix_socket_dir: PathBuf,
}

impl RuntimeLayout {
    pub fn new(home: &Path, start_dir: &str) -> Self {
        let root = home.join(start_dir);
        let system_dir = root.join("System");
        Self {
            bin_dir: root.join("Bin"),
            log_dir: root.join("Log"),
            unix_socket_dir: system_dir.join("UnixSocket"),
            system_dir,
            root,
        }
    }

    pub fn from_env(start_dir: &str) -> Result<Self, ConfigError> {
        let home =
            std::env::var("HOME").map_err(|_| ConfigError::EnvironmentMissing("HOME".to_string()))?;
        Ok(Self::new(Path::new(&home), start_dir))
    }

    pub fn mmc_listen_path(&self) -> PathBuf {
        self.unix_socket_dir.join(MMC_LISTEN_FILE)
    }

    pub fn rule_downloader_listen_path(&self) -> PathBuf {
        self.unix_socket_dir.join(RULE_DOWNLOADER_LISTEN_FILE)
    }

    pub fn netfinder_listen_path(&self) -> PathBuf {
        self.unix_socket_dir.join(NETFINDER_LISTEN_FILE)
    }

    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.bin_dir, &self.log_dir, &self.unix_socket_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                ConfigError::DirectoryDoesNotExist(format!("{}: {}", dir.display(), e))
            })?;
            debug!("[config] directory ready: {}", dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = RuntimeLayout::new(Path::new("/tmp/t1"), "NAA");
        assert_eq!(layout.log_dir, PathBuf::from("/tmp/t1/NAA/Log"));
        assert_eq!(
            layout.mmc_listen_path(),
            PathBuf::from("/tmp/t1/NAA/System/UnixSocket/SERVER_UNIX_MMC_LISTEN")
        );
        assert!(layout
            .netfinder_listen_path()
            .ends_with("UnixSocket/SERVER_UNIX_NETFINDER_LISTEN"));
    }

    #[test]
    fn test_ensure_directories() {
        let home = TempDir::new().unwrap();
        let layout = RuntimeLayout::new(home.path(), "NAA");
        layout.ensure_directories().unwrap();
        assert!(home.path().join("NAA/Log").is_dir());
        assert!(home.path().join("NAA/Bin").is_dir());
        assert!(home.path().join("NAA/System/UnixSocket").is_dir());
        // idempotent
        layout.ensure_directories().unwrap();
    }

    #[test]
    #[serial]
    fn test_from_env_uses_home() {
        let home = TempDir::new().unwrap();
        let saved = std::env::var("HOME").ok();
        std::env::set_var("HOME", home.path());
        let layout = RuntimeLayout::from_env("NAA").unwrap();
        if let Some(saved) = saved {
            std::env::set_var("HOME", saved);
        }
        assert_eq!(layout.root, home.path().join("NAA"));
    }
}
