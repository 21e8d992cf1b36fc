//! Bootstrap helpers for carel-agent.
//!
//! Env vars are loaded from `./.env` and `~/.carel-agent/.env` before any
//! configuration is resolved.

use std::path::PathBuf;

/// Home directory for agent state: `~/.carel-agent`.
pub fn carel_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".carel-agent")
}

/// Path to the agent-specific `.env` file: `~/.carel-agent/.env`.
pub fn carel_env_path() -> PathBuf {
    carel_home_dir().join(".env")
}

/// Outcome of loading `.env` files, kept until logging is initialised.
#[derive(Debug, Default)]
pub struct EnvLoadReport {
    pub loaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl EnvLoadReport {
    pub fn log(&self) {
        for path in &self.loaded {
            tracing::debug!("Loaded env overrides from {}", path.display());
        }
        for (path, err) in &self.failed {
            tracing::warn!("Failed to load {}: {}", path.display(), err);
        }
    }
}

/// Load env vars from `./.env` and then `~/.carel-agent/.env`.
///
/// dotenvy never overwrites existing vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.carel-agent/.env`
pub fn load_carel_env() -> EnvLoadReport {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
    }
    paths.push(carel_env_path());
    load_env_files(&paths)
}

/// Load each existing file in order. Missing files are skipped.
pub fn load_env_files(paths: &[PathBuf]) -> EnvLoadReport {
    let mut report = EnvLoadReport::default();
    for path in paths.iter().filter(|path| path.exists()) {
        match dotenvy::from_path(path) {
            Ok(()) => report.loaded.push(path.clone()),
            Err(e) => report.failed.push((path.clone(), e.to_string())),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_path_lives_under_home_dir() {
        let path = carel_env_path();
        assert!(path.ends_with(".carel-agent/.env"));
        assert_eq!(path.parent(), Some(carel_home_dir().as_path()));
    }

    #[test]
    fn malformed_env_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join(".env");
        std::fs::write(&broken, "not a valid line\n").unwrap();
        let missing = dir.path().join("missing.env");

        let report = load_env_files(&[missing, broken.clone()]);

        assert!(report.loaded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken);
    }
}
