use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::intent::{DashboardContext, Intent, Interpretation, Interpreter, InterpreterSource, Usage};
use crate::error::ActionError;
use crate::functions::catalog::{self, CATALOG_VERSION};
use crate::functions::render::describe_filter;
use crate::models::{InvoiceStatus, Message, ProviderId, Role};
use crate::providers::{ChatMessage, ChatRequest, ProviderRouter, StopReason};
use crate::services::settings::ModelSettings;

const SERVICE: &str = "language model";
/// Models don't report a calibrated score for tool choice.
const TOOL_CALL_CONFIDENCE: f32 = 0.8;
const MAX_TOKENS: u32 = 1024;

/// Maps utterances onto the function catalog by asking a language model to
/// pick exactly one tool.
pub struct SemanticInterpreter {
    router: Arc<ProviderRouter>,
    provider: ProviderId,
    model: String,
    api_key: String,
    base_url: Option<String>,
    temperature: Option<f32>,
    timeout: Duration,
}

impl SemanticInterpreter {
    pub fn new(
        router: Arc<ProviderRouter>,
        settings: &ModelSettings,
        api_key: String,
        timeout: Duration,
    ) -> Self {
        Self {
            router,
            provider: settings.provider,
            model: settings.model.clone(),
            api_key,
            base_url: settings.base_url.clone(),
            temperature: settings.temperature,
            timeout,
        }
    }

    fn build_request(
        &self,
        utterance: &str,
        history: &[Message],
        context: Option<&DashboardContext>,
    ) -> ChatRequest {
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        messages.push(ChatMessage {
            role: Role::User,
            content: utterance.to_string(),
        });

        ChatRequest {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            messages,
            base_url: self.base_url.clone(),
            temperature: self.temperature,
            system_prompt: Some(system_prompt(context)),
            max_tokens: Some(MAX_TOKENS),
            tools: catalog::definitions(),
            single_tool: true,
        }
    }
}

fn system_prompt(context: Option<&DashboardContext>) -> String {
    let statuses: Vec<&str> = InvoiceStatus::ALL.iter().map(|s| s.as_str()).collect();
    let mut prompt = format!(
        "You help a user query and update their invoices. Today is {}. \
         Answer every request by calling exactly one of the provided functions (catalog {}). \
         Invoice statuses are: {}. Amounts are in dollars and dates are YYYY-MM-DD. \
         Changes are only ever proposed; the user confirms them separately. \
         If the request is unclear or unrelated to invoices, reply with a short clarifying \
         question instead of calling a function.",
        Utc::now().date_naive(),
        CATALOG_VERSION,
        statuses.join(", ")
    );
    if let Some(context) = context {
        if !context.selected_record_ids.is_empty() {
            prompt.push_str(&format!(
                "\nThe user currently has these invoices selected: {}. \"This invoice\" refers to the selection.",
                context.selected_record_ids.join(", ")
            ));
        }
        if let Some(filter) = &context.active_filter {
            prompt.push_str(&format!(
                "\nThe dashboard is filtered to {}.",
                describe_filter(filter)
            ));
        }
    }
    prompt
}

#[async_trait]
impl Interpreter for SemanticInterpreter {
    fn name(&self) -> &'static str {
        "semantic"
    }

    async fn interpret(
        &self,
        utterance: &str,
        history: &[Message],
        context: Option<&DashboardContext>,
    ) -> Result<Interpretation, ActionError> {
        let request = self.build_request(utterance, history, context);
        tracing::debug!(provider = self.provider.as_str(), model = %self.model, "Interpreting with language model");

        let response = match tokio::time::timeout(
            self.timeout,
            self.router.send_message(&self.provider, request),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(ActionError::ExternalService {
                    service: SERVICE,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ActionError::ExternalService {
                    service: SERVICE,
                    message: format!("no response within {}s", self.timeout.as_secs()),
                })
            }
        };

        let usage = Some(Usage {
            model: response.model.clone(),
            tokens_in: response.tokens_in,
            tokens_out: response.tokens_out,
        });
        let reply = Some(response.content.trim().to_string()).filter(|s| !s.is_empty());

        let (intent, confidence) = match response.tool_calls.as_slice() {
            [] if response.stop_reason == Some(StopReason::Refusal) => (
                Intent::unrecognized("Sorry, I can't help with that request."),
                0.0,
            ),
            [] if response.stop_reason == Some(StopReason::MaxTokens) => {
                tracing::warn!(model = %response.model, "Model reply was cut off before choosing a function");
                (
                    Intent::unrecognized("Sorry, that request was too long for me to work out. Could you shorten it?"),
                    0.0,
                )
            }
            [] => (
                Intent::unrecognized(reply.clone().unwrap_or_else(|| {
                    "Sorry, I couldn't tell what you'd like to do with your invoices.".to_string()
                })),
                0.0,
            ),
            [call] => match catalog::parse_call(&call.name, call.arguments.clone()) {
                Ok(call) => (Intent::from_call(call), TOOL_CALL_CONFIDENCE),
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected model function call");
                    (
                        Intent::unrecognized(
                            "Sorry, I couldn't turn that into a supported invoice action.",
                        ),
                        0.0,
                    )
                }
            },
            calls => {
                tracing::warn!(count = calls.len(), "Model requested several functions at once");
                (
                    Intent::unrecognized("Sorry, I can only do one thing at a time. Which should I do first?"),
                    0.0,
                )
            }
        };

        Ok(Interpretation {
            intent,
            confidence,
            source: InterpreterSource::Semantic,
            reply,
            usage,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::functions::params::StatusChangeParams;
    use crate::providers::{AiProvider, ChatResponse, ProviderError, ToolCall};

    pub(crate) enum Scripted {
        Respond(ChatResponse),
        Fail,
        Hang,
    }

    /// Provider that answers from a script and records the last request.
    pub(crate) struct ScriptedProvider {
        pub(crate) script: Scripted,
        pub(crate) last_request: Mutex<Option<ChatRequest>>,
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn provider_id(&self) -> ProviderId {
            ProviderId::Local
        }

        async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            *self.last_request.lock().unwrap() = Some(request);
            match &self.script {
                Scripted::Respond(response) => Ok(response.clone()),
                Scripted::Fail => Err(ProviderError::NetworkError("connection refused".to_string())),
                Scripted::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(ProviderError::NetworkError("unreachable".to_string()))
                }
            }
        }
    }

    pub(crate) fn tool_response(name: &str, arguments: serde_json::Value) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            model: "test-model".to_string(),
            tokens_in: Some(120),
            tokens_out: Some(14),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments,
            }],
            stop_reason: None,
        }
    }

    pub(crate) fn semantic(script: Scripted, timeout: Duration) -> (SemanticInterpreter, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider {
            script,
            last_request: Mutex::new(None),
        });
        let mut router = ProviderRouter::new();
        router.register(provider.clone());
        let settings = ModelSettings {
            provider: ProviderId::Local,
            model: "test-model".to_string(),
            base_url: None,
            temperature: Some(0.0),
        };
        (
            SemanticInterpreter::new(Arc::new(router), &settings, String::new(), timeout),
            provider,
        )
    }

    #[tokio::test]
    async fn test_tool_call_becomes_intent() {
        let (interpreter, provider) = semantic(
            Scripted::Respond(tool_response(
                "propose_status_change",
                serde_json::json!({"record_id": "INV-100", "to": "paid"}),
            )),
            Duration::from_secs(5),
        );
        let result = interpreter
            .interpret("settle the acme invoice from june", &[], None)
            .await
            .unwrap();
        assert_eq!(
            result.intent,
            Intent::ProposeStatusChange(StatusChangeParams {
                record_id: "INV-100".to_string(),
                to: InvoiceStatus::Paid,
            })
        );
        assert_eq!(result.source, InterpreterSource::Semantic);
        assert_eq!(result.usage.unwrap().tokens_in, Some(120));

        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.tools.len(), 6);
        assert_eq!(request.messages.last().unwrap().content, "settle the acme invoice from june");
    }

    #[tokio::test]
    async fn test_unknown_function_fails_closed() {
        let (interpreter, _) = semantic(
            Scripted::Respond(tool_response("delete_all_records", serde_json::json!({}))),
            Duration::from_secs(5),
        );
        let result = interpreter.interpret("wipe everything", &[], None).await.unwrap();
        assert!(result.intent.is_unrecognized());
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_text_reply_is_kept_as_clarification() {
        let response = ChatResponse {
            content: "Which vendor do you mean?".to_string(),
            tool_calls: Vec::new(),
            ..tool_response("unused", serde_json::Value::Null)
        };
        let (interpreter, _) = semantic(Scripted::Respond(response), Duration::from_secs(5));
        let result = interpreter.interpret("the usual ones", &[], None).await.unwrap();
        assert_eq!(
            result.intent,
            Intent::unrecognized("Which vendor do you mean?")
        );
        assert_eq!(result.reply.as_deref(), Some("Which vendor do you mean?"));
    }

    #[tokio::test]
    async fn test_transport_error_and_timeout_are_external_service() {
        let (interpreter, _) = semantic(Scripted::Fail, Duration::from_secs(5));
        let err = interpreter.interpret("pending invoices", &[], None).await.unwrap_err();
        assert_eq!(err.kind(), "external_service");

        let (interpreter, _) = semantic(Scripted::Hang, Duration::from_millis(50));
        let err = interpreter.interpret("pending invoices", &[], None).await.unwrap_err();
        assert!(matches!(err, ActionError::ExternalService { service: "language model", .. }));
    }

    #[tokio::test]
    async fn test_refusal_is_unrecognized() {
        let response = ChatResponse {
            tool_calls: Vec::new(),
            stop_reason: Some(StopReason::Refusal),
            ..tool_response("unused", serde_json::Value::Null)
        };
        let (interpreter, provider) = semantic(Scripted::Respond(response), Duration::from_secs(5));
        let result = interpreter.interpret("do something awful", &[], None).await.unwrap();
        assert!(result.intent.is_unrecognized());
        assert!(provider.last_request.lock().unwrap().as_ref().unwrap().single_tool);
    }

    #[test]
    fn test_prompt_mentions_selection() {
        let context = DashboardContext {
            selected_record_ids: vec!["INV-9".to_string()],
            active_filter: None,
        };
        let prompt = system_prompt(Some(&context));
        assert!(prompt.contains("INV-9"));
        assert!(prompt.contains(CATALOG_VERSION));
    }
}
