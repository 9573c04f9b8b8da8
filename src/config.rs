//! Per-user configuration directory bootstrap.

use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::SupervisorError;

/// Resolve (and create, if missing) the per-user `serialosc` configuration
/// directory. Device subprocesses read per-device configuration files from
/// here; the supervisor itself only needs the directory to exist.
pub fn config_dir() -> Result<PathBuf, SupervisorError> {
    let dirs = ProjectDirs::from("org", "monome", "serialosc").ok_or_else(|| {
        SupervisorError::ConfigDir(io::Error::new(io::ErrorKind::NotFound, "no home directory"))
    })?;
    let dir = dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&dir).map_err(SupervisorError::ConfigDir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_is_created() {
        let dir = config_dir().expect("config dir should resolve");
        assert!(dir.is_dir());
    }
}
