use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::traits::AiProvider;
use super::types::{ChatRequest, ChatResponse, ProviderError};
use crate::models::ProviderId;

#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<ProviderId, Arc<dyn AiProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with every built-in backend registered.
    pub fn with_builtin() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(super::claude::ClaudeProvider::new()));
        router.register(Arc::new(super::local::LocalProvider::new()));
        router
    }

    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        self.providers.insert(provider.provider_id(), provider);
    }

    pub async fn send_message(
        &self,
        provider_id: &ProviderId,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let provider = self.providers.get(provider_id).ok_or_else(|| {
            ProviderError::RequestFailed(format!("Provider {} is not registered", provider_id.as_str()))
        })?;
        let started = Instant::now();
        let result = provider.send_message(request).await;
        tracing::debug!(
            provider = provider_id.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Model request finished"
        );
        result
    }

    pub fn is_registered(&self, provider_id: ProviderId) -> bool {
        self.providers.contains_key(&provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_backends_are_registered() {
        let router = ProviderRouter::with_builtin();
        assert!(router.is_registered(ProviderId::Claude));
        assert!(router.is_registered(ProviderId::Local));
        assert!(!ProviderRouter::new().is_registered(ProviderId::Claude));
    }
}
