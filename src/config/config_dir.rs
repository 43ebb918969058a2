use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::error::ConfigResult;

const CONFIG_FILE: &str = "config.toml";

/// Explicit override, wins over every other location.
pub static CONFIG_ENV: &str = "MUED_CONFIG";

pub fn find_config_file(use_local: bool) -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    #[cfg(unix)]
    let home = std::env::var_os("HOME");
    #[cfg(windows)]
    let home = std::env::var_os("APPDATA");
    #[cfg(not(any(unix, windows)))]
    let home: Option<std::ffi::OsString> = None;

    resolve_config_file(use_local, home.map(PathBuf::from).as_deref())
}

/// `./config.toml` for local runs, otherwise the per-user config dir if the file exists there.
fn resolve_config_file(use_local: bool, home: Option<&Path>) -> PathBuf {
    let local = PathBuf::from(".").join(CONFIG_FILE);
    if use_local {
        return local;
    }

    let Some(home) = home else {
        return local;
    };

    let mut path = home.to_path_buf();
    if cfg!(unix) {
        path = path.join(".config");
    }
    let path = path.join(crate::APPLICATION_NAME).join(CONFIG_FILE);

    if path.exists() { path } else { local }
}

pub fn read_config(use_local: bool) -> ConfigResult<Vec<u8>> {
    read_config_from(&find_config_file(use_local))
}

fn read_config_from(filename: &Path) -> ConfigResult<Vec<u8>> {
    tracing::trace!("looking for config at: {}", filename.display());
    if !filename.exists() {
        return Err(crate::config::error::ConfigError::ConfigNotFound);
    }

    let filename = filename.canonicalize()?;
    debug!("using {} as configuration file", filename.display());

    let mut fd = File::open(filename)?;
    let mut buf = Vec::new();
    fd.read_to_end(&mut buf)?;

    Ok(buf)
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn local_lookup_ignores_home() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = resolve_config_file(true, Some(temp_dir.path()));
        assert_eq!(path, PathBuf::from("./config.toml"));
    }

    #[test]
    fn user_config_dir_is_used_when_present() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut dir = temp_dir.path().to_path_buf();
        if cfg!(unix) {
            dir = dir.join(".config");
        }
        let dir = dir.join(crate::APPLICATION_NAME);
        fs::create_dir_all(&dir).unwrap();
        let config_file = dir.join("config.toml");
        fs::write(&config_file, "dummy = true").unwrap();

        assert_eq!(resolve_config_file(false, Some(temp_dir.path())), config_file);
    }

    #[test]
    fn falls_back_to_local_when_user_config_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = resolve_config_file(false, Some(temp_dir.path()));
        assert_eq!(path, PathBuf::from("./config.toml"));
        assert_eq!(resolve_config_file(false, None), PathBuf::from("./config.toml"));
    }

    #[test]
    fn read_config_returns_file_contents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("config.toml");
        fs::write(&file_path, b"foo = 'bar'").unwrap();

        let result = read_config_from(&file_path).unwrap();
        assert_eq!(result, b"foo = 'bar'");
    }

    #[test]
    fn read_config_reports_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = read_config_from(&temp_dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound)));
    }
}
