use rollcall_core::{Policy, PolicyError};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database holding identities and attendance.
    pub db_path: PathBuf,
    /// Policy file; the built-in reference policy is used when unset.
    pub policy_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var_os("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            policy_path: std::env::var_os("ROLLCALL_POLICY").map(PathBuf::from),
        }
    }

    pub fn load_policy(&self) -> Result<Policy, PolicyError> {
        match &self.policy_path {
            Some(path) => Policy::load(path),
            None => Policy::reference(),
        }
    }
}

fn default_db_path() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    data_home.join("rollcall").join("rollcall.db")
}
