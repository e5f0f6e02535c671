use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use directories::UserDirs;

/// Name of the directory under `~/.config` holding our files.
const CONFIG_DIR_NAME: &str = "cdd";

/*
Parameter defaults in ~/.config/cdd/cluster.toml
Cluster results next to the embedding table they were computed from.
*/

pub(crate) trait ConfigPath {
    fn get_root_path() -> Result<PathBuf>;

    /// Path of a file directly under the root. Nothing is created.
    fn get_file_path<P: AsRef<Path>>(name: P) -> Result<PathBuf> {
        Ok(Self::get_root_path()?.join(name))
    }
}

pub(crate) struct UserConfig();
impl ConfigPath for UserConfig {
    /// Get the path to the user config directory.
    /// As a matter of taste we force the XDG layout rather than the
    /// OS-specific one.
    fn get_root_path() -> Result<PathBuf> {
        let home_dir = UserDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or_else(|| anyhow!("Failed to get home directory"))?;
        Ok(home_dir.join(".config").join(CONFIG_DIR_NAME))
    }
}
