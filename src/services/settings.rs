use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::database::Database;
use crate::models::ProviderId;

const SETTINGS_KEY: &str = "app_settings";
/// Upper bound on how long a proposal may wait for confirmation.
const MAX_PROPOSAL_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub interpreter_timeout_secs: u64,
    pub storage_timeout_secs: u64,
    pub proposal_ttl_secs: u64,
    /// Number of recent messages sent to the interpreter as context.
    pub history_window: u32,
    #[serde(default)]
    pub model: Option<ModelSettings>,
}

/// Which language-model backend the semantic interpreter uses. Without it the
/// assistant runs on the deterministic interpreter alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub provider: ProviderId,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            interpreter_timeout_secs: 10,
            storage_timeout_secs: 3,
            proposal_ttl_secs: 600,
            history_window: 20,
            model: None,
        }
    }
}

impl AppSettings {
    pub fn interpreter_timeout(&self) -> Duration {
        Duration::from_secs(self.interpreter_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Clamped to one day.
    pub fn proposal_ttl(&self) -> chrono::Duration {
        let secs = self.proposal_ttl_secs.min(MAX_PROPOSAL_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(db: &Database) -> AppSettings {
        match db.get_setting(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings: {}", e);
                AppSettings::default()
            }),
            Ok(None) => AppSettings::default(),
            Err(e) => {
                tracing::error!("Failed to load settings: {}", e);
                AppSettings::default()
            }
        }
    }

    pub async fn save(db: &Database, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        db.set_setting(SETTINGS_KEY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_when_unset_and_round_trip() {
        let db = Database::new_in_memory().unwrap();
        assert_eq!(SettingsService::load(&db).await, AppSettings::default());

        let settings = AppSettings {
            history_window: 8,
            model: Some(ModelSettings {
                provider: ProviderId::Local,
                model: "llama3.1".to_string(),
                base_url: Some("http://localhost:11434".to_string()),
                temperature: Some(0.0),
            }),
            ..AppSettings::default()
        };
        SettingsService::save(&db, &settings).await.unwrap();
        assert_eq!(SettingsService::load(&db).await, settings);
    }

    #[test]
    fn test_proposal_ttl_is_clamped() {
        assert_eq!(AppSettings::default().proposal_ttl(), chrono::Duration::minutes(10));
        let settings = AppSettings {
            proposal_ttl_secs: u64::MAX,
            ..AppSettings::default()
        };
        assert_eq!(settings.proposal_ttl(), chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn test_corrupt_settings_fall_back_to_defaults() {
        let db = Database::new_in_memory().unwrap();
        db.set_setting(SETTINGS_KEY, "{not json").await.unwrap();
        assert_eq!(SettingsService::load(&db).await, AppSettings::default());
    }
}
