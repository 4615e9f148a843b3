use crate::defaults;
use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Base devrules config directory (universal ~/.config/devrules/ on all platforms)
pub fn devrules() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("devrules"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("devrules"))
    }
}

/// Default deployment log location when the config does not set `store_path`.
pub fn default_store() -> Result<PathBuf> {
    Ok(devrules()?.join(defaults::STORE_FILE_NAME))
}

/// Project config file in the given working directory.
pub fn project_config(dir: &Path) -> PathBuf {
    dir.join(defaults::CONFIG_FILE_NAME)
}

/// Expand `~` and environment variables in a configured path.
pub fn expand(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| {
        Error::config_invalid_value("path", Some(raw.to_string()), e.to_string())
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_config_joins_file_name() {
        let path = project_config(Path::new("/repo"));
        assert_eq!(path, PathBuf::from("/repo/.devrules.toml"));
    }

    #[test]
    fn expand_leaves_plain_paths_alone() {
        assert_eq!(expand("/var/lib/db.sqlite").unwrap(), PathBuf::from("/var/lib/db.sqlite"));
    }
}
