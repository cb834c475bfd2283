//! On-disk credential files written by the pi and Claude CLIs.
//!
//! The bridge only reads these files. OAuth tokens feed the rate-limit
//! probe; the per-provider entries in pi's auth file back `auth/status`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::protocol::ProviderAuthStatus;

/// Providers the desktop knows how to authenticate against.
pub const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai", "google", "mistral", "opencode"];

const PI_AUTH_FILE: &str = ".pi/agent/auth.json";
const CLAUDE_CREDENTIALS_FILE: &str = ".claude/.credentials.json";

#[derive(Debug, Clone)]
pub struct OauthCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix epoch milliseconds.
    pub expires_at: Option<i64>,
}

impl OauthCredentials {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now_ms)
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

fn pi_anthropic_oauth(root: &Value) -> Option<OauthCredentials> {
    let entry = root.get("anthropic")?;
    Some(OauthCredentials {
        access_token: entry.get("access")?.as_str()?.to_string(),
        refresh_token: entry
            .get("refresh")
            .and_then(Value::as_str)
            .map(str::to_string),
        expires_at: entry.get("expires").and_then(Value::as_i64),
    })
}

fn claude_oauth(root: &Value) -> Option<OauthCredentials> {
    let entry = root.get("claudeAiOauth")?;
    Some(OauthCredentials {
        access_token: entry.get("accessToken")?.as_str()?.to_string(),
        refresh_token: entry
            .get("refreshToken")
            .and_then(Value::as_str)
            .map(str::to_string),
        expires_at: entry.get("expiresAt").and_then(Value::as_i64),
    })
}

/// Load the first usable OAuth credential, trying pi's auth file before the
/// Claude CLI's.
pub fn load_oauth_credentials(home: &Path) -> Option<OauthCredentials> {
    if let Some(root) = read_json(&home.join(PI_AUTH_FILE)) {
        if let Some(creds) = pi_anthropic_oauth(&root) {
            return Some(creds);
        }
    }
    read_json(&home.join(CLAUDE_CREDENTIALS_FILE))
        .as_ref()
        .and_then(claude_oauth)
}

/// Per-provider authentication status from pi's auth file, padded with the
/// known providers that have no stored credential.
pub fn provider_statuses(home: &Path, now_ms: i64) -> Vec<ProviderAuthStatus> {
    let mut statuses = Vec::new();

    if let Some(Value::Object(entries)) = read_json(&home.join(PI_AUTH_FILE)) {
        for (provider, entry) in &entries {
            if !entry.is_object() {
                continue;
            }
            let expired = entry
                .get("expires")
                .and_then(Value::as_i64)
                .map(|expires| expires <= now_ms);
            statuses.push(ProviderAuthStatus {
                provider: provider.clone(),
                authenticated: true,
                expired,
            });
        }
    }

    for provider in KNOWN_PROVIDERS {
        if !statuses.iter().any(|status| status.provider == *provider) {
            statuses.push(ProviderAuthStatus {
                provider: (*provider).to_string(),
                authenticated: false,
                expired: None,
            });
        }
    }

    statuses
}

pub fn default_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_home_file(home: &Path, relative: &str, value: &Value) {
        let path = home.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn pi_auth_file_wins_over_claude_credentials() {
        let home = tempfile::tempdir().unwrap();
        write_home_file(
            home.path(),
            PI_AUTH_FILE,
            &json!({"anthropic": {"access": "pi-token", "refresh": "r", "expires": 99}}),
        );
        write_home_file(
            home.path(),
            CLAUDE_CREDENTIALS_FILE,
            &json!({"claudeAiOauth": {"accessToken": "claude-token"}}),
        );

        let creds = load_oauth_credentials(home.path()).unwrap();
        assert_eq!(creds.access_token, "pi-token");
        assert_eq!(creds.expires_at, Some(99));
    }

    #[test]
    fn claude_credentials_are_the_fallback() {
        let home = tempfile::tempdir().unwrap();
        write_home_file(
            home.path(),
            CLAUDE_CREDENTIALS_FILE,
            &json!({"claudeAiOauth": {
                "accessToken": "claude-token",
                "refreshToken": "refresh",
                "expiresAt": 1234
            }}),
        );

        let creds = load_oauth_credentials(home.path()).unwrap();
        assert_eq!(creds.access_token, "claude-token");
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(creds.expires_at, Some(1234));
    }

    #[test]
    fn missing_files_yield_no_credentials() {
        let home = tempfile::tempdir().unwrap();
        assert!(load_oauth_credentials(home.path()).is_none());
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let creds = OauthCredentials {
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: Some(1000),
        };
        assert!(creds.is_expired(1000));
        assert!(creds.is_expired(1001));
        assert!(!creds.is_expired(999));
    }

    #[test]
    fn provider_statuses_pad_known_providers() {
        let home = tempfile::tempdir().unwrap();
        write_home_file(
            home.path(),
            PI_AUTH_FILE,
            &json!({
                "anthropic": {"access": "a", "expires": 500},
                "openai": {"apiKey": "sk-..."}
            }),
        );

        let statuses = provider_statuses(home.path(), 1000);
        let anthropic = statuses
            .iter()
            .find(|status| status.provider == "anthropic")
            .unwrap();
        assert!(anthropic.authenticated);
        assert_eq!(anthropic.expired, Some(true));

        let openai = statuses
            .iter()
            .find(|status| status.provider == "openai")
            .unwrap();
        assert!(openai.authenticated);
        assert_eq!(openai.expired, None);

        let google = statuses
            .iter()
            .find(|status| status.provider == "google")
            .unwrap();
        assert!(!google.authenticated);
        assert_eq!(statuses.len(), KNOWN_PROVIDERS.len());
    }
}
