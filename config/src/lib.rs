//! Load project `.env` into the process environment (existing env wins),
//! then read typed [`Settings`] for the control plane and gateway.
//!
//! Every policy knob (outbox cadence, iteration caps, queue bounds, TTLs)
//! lives here with its default, so the rest of the workspace never reads
//! `std::env` directly.

mod settings;

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

pub use settings::{Environment, Settings};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Errors surfaced while building [`Settings`] from the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required operator-level configuration is absent (fail fast).
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Loads `.env` from `override_dir` (or the current directory) and sets each
/// key that is **not** already present in the process environment, so real
/// env always wins over file contents. A missing `.env` is not an error.
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), LoadError> {
    let map = load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    for (key, value) in map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

fn env_file_path(override_dir: Option<&Path>) -> Option<std::path::PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Reads `.env` into a map. Lines are `KEY=VALUE`; blank lines and `#`
/// comments are skipped; surrounding single or double quotes are stripped
/// (double quotes honour `\"`).
fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let Some(path) = env_file_path(override_dir) else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path)?;
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), unquote(value.trim()));
    }
    Ok(out)
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].replace("\\\"", "\"");
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// **Scenario**: a key already set in the environment is not overwritten
    /// by `.env`.
    #[test]
    fn existing_env_wins_over_dotenv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "HELM_TEST_PRECEDENCE=file\n").unwrap();
        env::set_var("HELM_TEST_PRECEDENCE", "env");
        load_and_apply(Some(dir.path())).unwrap();
        assert_eq!(env::var("HELM_TEST_PRECEDENCE").as_deref(), Ok("env"));
        env::remove_var("HELM_TEST_PRECEDENCE");
    }

    /// **Scenario**: keys absent from the environment are filled from `.env`.
    #[test]
    fn dotenv_fills_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "HELM_TEST_FILL=from_file\n").unwrap();
        env::remove_var("HELM_TEST_FILL");
        load_and_apply(Some(dir.path())).unwrap();
        assert_eq!(env::var("HELM_TEST_FILL").as_deref(), Ok("from_file"));
        env::remove_var("HELM_TEST_FILL");
    }

    /// **Scenario**: a missing `.env` file is fine.
    #[test]
    fn missing_env_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_and_apply(Some(dir.path())).is_ok());
    }

    #[test]
    fn parse_skips_comments_and_unquotes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "# comment\nA=\"quoted value\"\nB='single'\nnot_a_pair\nC=plain\n",
        )
        .unwrap();
        let map = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(map.get("A").map(String::as_str), Some("quoted value"));
        assert_eq!(map.get("B").map(String::as_str), Some("single"));
        assert_eq!(map.get("C").map(String::as_str), Some("plain"));
        assert_eq!(map.len(), 3);
    }
}
