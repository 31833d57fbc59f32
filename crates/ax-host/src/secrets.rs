//! The host secret store.
//!
//! Secrets live in `<root>/.env` and nowhere else. Values handed out are
//! wrapped in `Zeroizing` so they wipe on drop. Only the credential proxy
//! and the OAuth refresher ever ask for them.

use ax_proxy::SecretResolver;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

/// `.env`-backed secret store.
pub struct EnvSecretStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl EnvSecretStore {
    /// Load the store. A missing file is an empty store.
    pub fn load(path: PathBuf) -> Self {
        let values = parse_env(&path);
        debug!(count = values.len(), path = %path.display(), "Loaded secret store");
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    /// The backing file, for OAuth token rewrites.
    pub fn env_path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file (after a token rewrite).
    pub fn reload(&self) {
        let fresh = parse_env(&self.path);
        *self.values.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }

    /// Whether a key is present (without exposing the value).
    pub fn has(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

impl SecretResolver for EnvSecretStore {
    fn resolve(&self, env_var: &str) -> Option<Zeroizing<String>> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(env_var)
            .map(|v| Zeroizing::new(v.clone()))
    }
}

/// Parse a `.env` file: `KEY=value` lines, `#` comments, blank lines.
/// Values keep embedded `=`; surrounding single/double quotes are stripped.
fn parse_env(path: &Path) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return values,
    };
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim().to_string();
            let mut value = value.trim();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            values.insert(key, value.to_string());
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(contents: &str) -> (EnvSecretStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, contents).unwrap();
        (EnvSecretStore::load(path), tmp)
    }

    #[test]
    fn parses_keys_and_skips_comments() {
        let (store, _tmp) = store_with("# header\nANTHROPIC_API_KEY=sk-abc\n\nOTHER=1\n");
        assert!(store.has("ANTHROPIC_API_KEY"));
        assert!(store.has("OTHER"));
        assert!(!store.has("header"));
        assert_eq!(&*store.resolve("ANTHROPIC_API_KEY").unwrap(), "sk-abc");
    }

    #[test]
    fn strips_quotes_and_keeps_embedded_equals() {
        let (store, _tmp) = store_with("A=\"quoted\"\nB='single'\nC=x=y=z\n");
        assert_eq!(&*store.resolve("A").unwrap(), "quoted");
        assert_eq!(&*store.resolve("B").unwrap(), "single");
        assert_eq!(&*store.resolve("C").unwrap(), "x=y=z");
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnvSecretStore::load(tmp.path().join("nope.env"));
        assert!(store.resolve("ANYTHING").is_none());
    }

    #[test]
    fn reload_picks_up_rewrites() {
        let (store, tmp) = store_with("TOKEN=old\n");
        std::fs::write(tmp.path().join(".env"), "TOKEN=new\n").unwrap();
        assert_eq!(&*store.resolve("TOKEN").unwrap(), "old");
        store.reload();
        assert_eq!(&*store.resolve("TOKEN").unwrap(), "new");
    }
}
