//! OAuth token lifecycle for proxied vendors.
//!
//! Access tokens are refreshed eagerly, at least five minutes before
//! expiry, and the refreshed values are rewritten back into the `.env`
//! file while keeping every unrelated line (comments included) intact.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Refresh tokens this many seconds before they expire.
pub const REFRESH_WINDOW_SECS: i64 = 300;

/// A vendor OAuth token set as held by the host.
#[derive(Debug, Clone)]
pub struct OauthToken {
    pub access: String,
    pub refresh: String,
    pub expires_at: DateTime<Utc>,
}

impl OauthToken {
    /// Whether the token should be refreshed now.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now < Duration::seconds(REFRESH_WINDOW_SECS)
    }

    /// The access token wrapped for auto-wipe on drop.
    pub fn access_zeroizing(&self) -> Zeroizing<String> {
        Zeroizing::new(self.access.clone())
    }
}

/// Wire shape of a token-endpoint refresh response.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

/// Exchange a refresh token for a fresh access token.
///
/// Failures are returned, not panicked: at startup a refresh failure is
/// non-fatal and the caller keeps the stale token, telling the user to
/// re-authenticate.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    token: &OauthToken,
) -> Result<OauthToken, String> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", token.refresh.as_str()),
        ("client_id", client_id),
    ];

    let response = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| format!("token endpoint unreachable: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("token refresh failed: HTTP {}", response.status()));
    }

    let parsed: RefreshResponse = response
        .json()
        .await
        .map_err(|e| format!("malformed token response: {e}"))?;

    info!(expires_in = parsed.expires_in, "Refreshed OAuth access token");
    Ok(OauthToken {
        access: parsed.access_token,
        refresh: parsed
            .refresh_token
            .unwrap_or_else(|| token.refresh.clone()),
        expires_at: Utc::now() + Duration::seconds(parsed.expires_in as i64),
    })
}

/// Refresh a token if needed, tolerating failure.
///
/// Returns the token to keep using. On refresh failure the stale token is
/// kept and the condition logged; the user re-authenticates next time.
pub async fn refresh_if_needed(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    token: OauthToken,
) -> OauthToken {
    if !token.needs_refresh(Utc::now()) {
        return token;
    }
    match refresh_token(client, token_url, client_id, &token).await {
        Ok(fresh) => fresh,
        Err(e) => {
            warn!(error = %e, "OAuth refresh failed, keeping stale token; re-authenticate if calls fail");
            token
        }
    }
}

/// Rewrite managed token keys in a `.env` file, preserving every unrelated
/// line byte-for-byte. Keys not present in the file are appended. The write
/// is atomic (tmp + rename).
pub fn rewrite_env_tokens(
    env_path: &Path,
    updates: &HashMap<String, String>,
) -> std::io::Result<()> {
    let original = std::fs::read_to_string(env_path).unwrap_or_default();
    let mut remaining: HashMap<&str, &str> = updates
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut out = String::with_capacity(original.len());
    for line in original.lines() {
        let trimmed = line.trim_start();
        let replaced = if !trimmed.starts_with('#') {
            trimmed
                .split_once('=')
                .and_then(|(key, _)| remaining.remove_entry(key.trim()))
        } else {
            None
        };
        match replaced {
            Some((key, value)) => {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }

    // Append keys that had no existing line, in sorted order for stability.
    let mut leftover: Vec<(&str, &str)> = remaining.into_iter().collect();
    leftover.sort();
    for (key, value) in leftover {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }

    let tmp = env_path.with_extension("env.tmp");
    std::fs::write(&tmp, out.as_bytes())?;
    std::fs::rename(&tmp, env_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_refresh_inside_window() {
        let now = Utc::now();
        let token = OauthToken {
            access: "a".into(),
            refresh: "r".into(),
            expires_at: now + Duration::seconds(120),
        };
        assert!(token.needs_refresh(now));

        let fresh = OauthToken {
            expires_at: now + Duration::seconds(3600),
            ..token.clone()
        };
        assert!(!fresh.needs_refresh(now));

        let expired = OauthToken {
            expires_at: now - Duration::seconds(10),
            ..token
        };
        assert!(expired.needs_refresh(now));
    }

    #[test]
    fn env_rewrite_preserves_unrelated_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(
            &path,
            "# secrets for ax\nANTHROPIC_API_KEY=sk-old\nDB_URL=postgres://x\n\nSLACK_ACCESS_TOKEN=stale\n",
        )
        .unwrap();

        let mut updates = HashMap::new();
        updates.insert("SLACK_ACCESS_TOKEN".to_string(), "fresh-token".to_string());
        rewrite_env_tokens(&path, &updates).unwrap();

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("# secrets for ax\n"));
        assert!(rewritten.contains("ANTHROPIC_API_KEY=sk-old\n"));
        assert!(rewritten.contains("DB_URL=postgres://x\n"));
        assert!(rewritten.contains("SLACK_ACCESS_TOKEN=fresh-token\n"));
        assert!(!rewritten.contains("stale"));
    }

    #[test]
    fn env_rewrite_appends_missing_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "EXISTING=1\n").unwrap();

        let mut updates = HashMap::new();
        updates.insert("NEW_TOKEN".to_string(), "abc".to_string());
        rewrite_env_tokens(&path, &updates).unwrap();

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("EXISTING=1\n"));
        assert!(rewritten.ends_with("NEW_TOKEN=abc\n"));
    }

    #[test]
    fn env_rewrite_handles_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");

        let mut updates = HashMap::new();
        updates.insert("TOKEN".to_string(), "v".to_string());
        rewrite_env_tokens(&path, &updates).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "TOKEN=v\n");
    }

    #[test]
    fn env_rewrite_ignores_commented_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "# TOKEN=commented\nTOKEN=live\n").unwrap();

        let mut updates = HashMap::new();
        updates.insert("TOKEN".to_string(), "new".to_string());
        rewrite_env_tokens(&path, &updates).unwrap();

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("# TOKEN=commented\n"));
        assert!(rewritten.contains("TOKEN=new\n"));
    }
}
