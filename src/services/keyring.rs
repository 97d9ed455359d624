use std::sync::Arc;

use anyhow::{Context, Result};
use oo7::Keyring;

use crate::config::APP_ID;
use crate::models::ProviderId;

const ATTR_APP: &str = "application";
const ATTR_PROVIDER: &str = "provider";

/// Model API keys live in the desktop secret service, one per provider.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    keyring: Arc<Keyring>,
}

impl CredentialStore {
    pub async fn new() -> Result<Self> {
        let keyring = Keyring::new()
            .await
            .context("Failed to initialize keyring")?;
        Ok(Self {
            keyring: Arc::new(keyring),
        })
    }

    pub async fn store_api_key(&self, provider: ProviderId, secret: &str) -> Result<()> {
        let attributes = Self::attributes(provider);
        self.keyring
            .create_item(
                &format!("Tally API key ({})", provider.display_name()),
                &attributes,
                secret,
                true,
            )
            .await
            .context("Failed to store API key in keyring")?;
        Ok(())
    }

    pub async fn api_key(&self, provider: ProviderId) -> Result<Option<String>> {
        let items = self
            .keyring
            .search_items(&Self::attributes(provider))
            .await
            .context("Failed to search keyring")?;

        let Some(item) = items.first() else {
            return Ok(None);
        };
        let secret = item.secret().await.context("Failed to read secret")?;
        let key = String::from_utf8(secret.to_vec()).context("Stored API key is not UTF-8")?;
        Ok(Some(key))
    }

    pub async fn forget_api_key(&self, provider: ProviderId) -> Result<()> {
        self.keyring
            .delete(&Self::attributes(provider))
            .await
            .context("Failed to delete API key from keyring")
    }

    fn attributes(provider: ProviderId) -> Vec<(&'static str, &'static str)> {
        vec![(ATTR_APP, APP_ID), (ATTR_PROVIDER, provider.as_str())]
    }
}
