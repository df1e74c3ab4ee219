//! Filesystem locations, taken from the environment.

use std::env;
use std::path::PathBuf;

/// Where the store, the downloads and the remote session live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub data_dir:     PathBuf,
    pub db_path:      PathBuf,
    pub download_dir: PathBuf,
    pub session_path: PathBuf,
}

impl Config {
    /// Read `TGSTASH_DATA_DIR`, `TGSTASH_DB_PATH`, `TGSTASH_DOWNLOAD_DIR` and
    /// `TGSTASH_SESSION_PATH`; anything unset lives under the data directory.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let data_dir = var("TGSTASH_DATA_DIR").unwrap_or_else(|| default_data_dir(lookup("HOME")));
        let db_path = var("TGSTASH_DB_PATH").unwrap_or_else(|| data_dir.join("tgstash.db"));
        let download_dir = var("TGSTASH_DOWNLOAD_DIR").unwrap_or_else(|| data_dir.join("downloads"));
        let session_path = var("TGSTASH_SESSION_PATH").unwrap_or_else(|| data_dir.join("tgstash.session"));

        Self { data_dir, db_path, download_dir, session_path }
    }
}

fn default_data_dir(home: Option<String>) -> PathBuf {
    let base = home.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    base.join(".local").join("share").join("tgstash")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn everything_defaults_under_home() {
        let cfg = config(&[("HOME", "/home/me")]);
        assert_eq!(cfg.data_dir, PathBuf::from("/home/me/.local/share/tgstash"));
        assert_eq!(cfg.db_path, PathBuf::from("/home/me/.local/share/tgstash/tgstash.db"));
        assert_eq!(cfg.download_dir, PathBuf::from("/home/me/.local/share/tgstash/downloads"));
        assert_eq!(cfg.session_path, PathBuf::from("/home/me/.local/share/tgstash/tgstash.session"));
    }

    #[test]
    fn explicit_paths_win() {
        let cfg = config(&[
            ("TGSTASH_DATA_DIR", "/srv/tg"),
            ("TGSTASH_DOWNLOAD_DIR", "/mnt/media"),
            ("TGSTASH_DB_PATH", ""),
        ]);
        assert_eq!(cfg.db_path, PathBuf::from("/srv/tg/tgstash.db"));
        assert_eq!(cfg.download_dir, PathBuf::from("/mnt/media"));
    }
}
