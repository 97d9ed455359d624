use std::sync::Arc;

use async_trait::async_trait;

use super::intent::{
    DashboardContext, Intent, Interpretation, Interpreter, InterpreterSource, CANONICAL_CONFIDENCE,
};
use super::deterministic::DeterministicInterpreter;
use super::semantic::SemanticInterpreter;
use crate::error::ActionError;
use crate::models::{Message, ProviderId};
use crate::providers::ProviderRouter;
use crate::services::settings::AppSettings;

const UNAVAILABLE: &str = "Sorry, I couldn't understand that right now. The assistant's language \
     service isn't responding; try a simpler phrasing like \"show overdue invoices\".";

/// Picks between the deterministic and semantic interpreters.
///
/// A canonical deterministic match wins outright. Otherwise the semantic
/// result is used, falling back to the deterministic one when the model
/// service is unavailable. Never returns an error.
pub struct HybridInterpreter {
    deterministic: Arc<dyn Interpreter>,
    semantic: Option<Arc<dyn Interpreter>>,
}

impl HybridInterpreter {
    pub fn new(deterministic: Arc<dyn Interpreter>, semantic: Option<Arc<dyn Interpreter>>) -> Self {
        Self {
            deterministic,
            semantic,
        }
    }

    /// Deterministic rules, plus a semantic interpreter when a model is
    /// configured. Claude needs an API key; without one the assistant runs on
    /// rules alone.
    pub fn from_settings(
        settings: &AppSettings,
        router: Arc<ProviderRouter>,
        api_key: Option<String>,
    ) -> Self {
        let deterministic: Arc<dyn Interpreter> = Arc::new(DeterministicInterpreter::new());
        let semantic: Option<Arc<dyn Interpreter>> = match (&settings.model, api_key) {
            (None, _) => None,
            (Some(model), None) if model.provider == ProviderId::Claude => {
                tracing::warn!("No API key for {}; using rules only", model.provider.display_name());
                None
            }
            (Some(model), key) => Some(Arc::new(SemanticInterpreter::new(
                router,
                model,
                key.unwrap_or_default(),
                settings.interpreter_timeout(),
            ))),
        };
        Self::new(deterministic, semantic)
    }

    pub fn has_semantic(&self) -> bool {
        self.semantic.is_some()
    }

    async fn select(
        &self,
        utterance: &str,
        history: &[Message],
        context: Option<&DashboardContext>,
    ) -> Interpretation {
        let rules = match self.deterministic.interpret(utterance, history, context).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Deterministic interpreter failed");
                Interpretation::new(
                    Intent::unrecognized(e.user_message()),
                    0.0,
                    InterpreterSource::Deterministic,
                )
            }
        };

        if rules.confidence >= CANONICAL_CONFIDENCE {
            return rules;
        }
        let Some(semantic) = &self.semantic else {
            return rules;
        };

        match semantic.interpret(utterance, history, context).await {
            Ok(result) => result,
            Err(ActionError::ExternalService { service, message }) => {
                tracing::warn!(service, error = %message, "Semantic interpreter unavailable");
                if rules.intent.is_unrecognized() {
                    Interpretation::new(
                        Intent::unrecognized(UNAVAILABLE),
                        0.0,
                        InterpreterSource::Semantic,
                    )
                } else {
                    rules
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Semantic interpreter failed");
                Interpretation::new(
                    Intent::unrecognized(format!("Sorry, {}", e.user_message())),
                    0.0,
                    InterpreterSource::Semantic,
                )
            }
        }
    }
}

#[async_trait]
impl Interpreter for HybridInterpreter {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn interpret(
        &self,
        utterance: &str,
        history: &[Message],
        context: Option<&DashboardContext>,
    ) -> Result<Interpretation, ActionError> {
        let mut result = self.select(utterance, history, context).await;
        result.intent = result.intent.with_dashboard_filter(context);
        tracing::debug!(
            intent = result.intent.name(),
            source = result.source.as_str(),
            confidence = result.confidence,
            "Interpreted utterance"
        );
        Ok(result)
    }
}
