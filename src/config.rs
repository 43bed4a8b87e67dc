use crate::retry::RetryPolicy;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SESSION_FILE: &str = "tiktok_config.json";
const SESSION_COOKIE: &str = "sessionid";
const MS_TOKEN_COOKIE: &str = "msToken";

/// Session captured by the login collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default)]
    pub app_context: AppContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppContext {
    #[serde(default)]
    pub user: Option<AppUser>,
    #[serde(rename = "userAgent", default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppUser {
    #[serde(rename = "uniqueId", default)]
    pub unique_id: Option<String>,
    #[serde(rename = "secUid", default)]
    pub sec_uid: Option<String>,
}

/// Validated credentials shared read-only by every request of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAuth {
    pub session_id: String,
    pub ms_token: String,
    pub user_agent: String,
    pub unique_id: String,
}

impl SessionAuth {
    pub fn cookie_header(&self) -> String {
        format!(
            "{SESSION_COOKIE}={}; {MS_TOKEN_COOKIE}={}",
            self.session_id, self.ms_token
        )
    }
}

impl SessionContext {
    fn cookie_value(&self, name: &str) -> Option<&str> {
        // Later entries win, matching how the browser export lists refreshed cookies.
        self.cookies
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| c.value.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn validate(&self) -> Result<SessionAuth> {
        let session_id = self.cookie_value(SESSION_COOKIE).ok_or_else(|| {
            EngineError::Configuration(format!("session is missing the {SESSION_COOKIE} cookie"))
        })?;
        let ms_token = self.cookie_value(MS_TOKEN_COOKIE).ok_or_else(|| {
            EngineError::Configuration(format!("session is missing the {MS_TOKEN_COOKIE} cookie"))
        })?;
        let user_agent = self
            .app_context
            .user_agent
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                EngineError::Configuration("session is missing app_context.userAgent".to_string())
            })?;
        let unique_id = self
            .app_context
            .user
            .as_ref()
            .and_then(|u| u.unique_id.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                EngineError::Configuration(
                    "session is missing app_context.user.uniqueId".to_string(),
                )
            })?;

        Ok(SessionAuth {
            session_id: session_id.to_string(),
            ms_token: ms_token.to_string(),
            user_agent: user_agent.to_string(),
            unique_id: unique_id.to_string(),
        })
    }
}

pub fn load_session_context(path: &Path) -> Result<SessionContext> {
    let bytes = std::fs::read(path).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to read session file at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to parse session file at {}: {e}",
            path.to_string_lossy()
        ))
    })
}

/// Tunables for naming, dedup heuristics, retries and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub description_word_limit: usize,
    pub max_filename_chars: usize,
    /// Existing videos larger than this are treated as complete.
    pub min_complete_video_bytes: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub item_delay_ms: u64,
    pub image_delay_ms: u64,
    pub http_timeout_secs: u64,
    /// Format `createTime` in the host timezone instead of UTC. Matches
    /// archives named by tools that use local time.
    pub local_dates: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            description_word_limit: 12,
            max_filename_chars: 150,
            min_complete_video_bytes: 300 * 1024,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1_000,
            item_delay_ms: 1_000,
            image_delay_ms: 500,
            http_timeout_secs: 60,
            local_dates: false,
        }
    }
}

impl DownloadSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn image_delay(&self) -> Duration {
        Duration::from_millis(self.image_delay_ms)
    }
}

/// Loads settings from `path`; a missing file yields the defaults.
pub fn load_download_settings(path: &Path) -> Result<DownloadSettings> {
    if !path.exists() {
        return Ok(DownloadSettings::default());
    }
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to parse download settings at {}: {e}",
            path.to_string_lossy()
        ))
    })
}

pub fn save_download_settings(path: &Path, settings: &DownloadSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, format!("{json}\n")).map_err(|e| EngineError::storage(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_json() -> &'static str {
        r#"{
          "cookies": [
            {"name": "sessionid", "value": "old", "domain": ".tiktok.com"},
            {"name": "msToken", "value": "tok"},
            {"name": "sessionid", "value": "abc"}
          ],
          "app_context": {
            "user": {"uniqueId": "me", "secUid": "sec"},
            "userAgent": "Mozilla/5.0 test"
          }
        }"#
    }

    #[test]
    fn validate_reads_latest_cookie_values() {
        let ctx: SessionContext = serde_json::from_str(session_json()).expect("parse");
        let auth = ctx.validate().expect("valid");
        assert_eq!(auth.session_id, "abc");
        assert_eq!(auth.ms_token, "tok");
        assert_eq!(auth.unique_id, "me");
        assert_eq!(auth.cookie_header(), "sessionid=abc; msToken=tok");
    }

    #[test]
    fn validate_rejects_missing_ms_token() {
        let ctx: SessionContext = serde_json::from_str(
            r#"{"cookies":[{"name":"sessionid","value":"abc"}],
                "app_context":{"user":{"uniqueId":"me"},"userAgent":"ua"}}"#,
        )
        .expect("parse");
        let err = ctx.validate().expect_err("missing token");
        assert!(matches!(err, EngineError::Configuration(ref m) if m.contains("msToken")));
    }

    #[test]
    fn load_session_context_reports_missing_file_as_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_session_context(&dir.path().join("nope.json")).expect_err("missing");
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults_and_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        assert_eq!(
            load_download_settings(&path).expect("defaults"),
            DownloadSettings::default()
        );

        std::fs::write(&path, r#"{"min_complete_video_bytes": 1024}"#).expect("write");
        let loaded = load_download_settings(&path).expect("load");
        assert_eq!(loaded.min_complete_video_bytes, 1024);
        assert_eq!(loaded.description_word_limit, 12);

        save_download_settings(&path, &loaded).expect("save");
        assert_eq!(load_download_settings(&path).expect("reload"), loaded);
    }
}
