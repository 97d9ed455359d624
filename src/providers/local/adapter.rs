use async_trait::async_trait;
use reqwest::Client;

use super::models::*;
use crate::models::{ProviderId, Role};
use crate::providers::traits::AiProvider;
use crate::providers::types::{
    ChatMessage, ChatRequest, ChatResponse, ProviderError, StopReason, ToolCall, ToolDefinition,
};

/// Any server speaking the OpenAI chat-completions dialect (Ollama, vLLM,
/// llama.cpp, LM Studio).
pub struct LocalProvider {
    client: Client,
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn translate_role(role: &Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    fn build_messages(system_prompt: Option<&str>, messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);

        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            result.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(prompt.to_string()),
                tool_calls: None,
            });
        }

        result.extend(messages.iter().map(|msg| OpenAiMessage {
            role: Self::translate_role(&msg.role).to_string(),
            content: Some(msg.content.clone()),
            tool_calls: None,
        }));

        result
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|t| OpenAiTool {
                        tool_type: "function".to_string(),
                        function: OpenAiFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        }
    }

    fn build_auth_header(api_key: &str) -> Option<String> {
        if api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", api_key))
        }
    }

    fn parse_arguments(raw: &str) -> serde_json::Value {
        if raw.trim().is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Tool call arguments are not JSON");
            serde_json::Value::String(raw.to_string())
        })
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    /// An argument string that is not valid JSON is passed through as a JSON
    /// string, which the catalog then rejects.
    fn parse_response(response: OpenAiResponse) -> Result<ChatResponse, ProviderError> {
        let choice = response.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let tool_calls: Vec<ToolCall> = choice
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: Self::parse_arguments(&tc.function.arguments),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let stop_reason = match choice.and_then(|c| c.finish_reason.as_deref()) {
            Some("tool_calls") => Some(StopReason::ToolUse),
            Some("length") => Some(StopReason::MaxTokens),
            Some("content_filter") => Some(StopReason::Refusal),
            _ if !tool_calls.is_empty() => Some(StopReason::ToolUse),
            _ => Some(StopReason::EndTurn),
        };

        if content.is_empty() && tool_calls.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "No content in response".to_string(),
            ));
        }

        let (tokens_in, tokens_out) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));

        Ok(ChatResponse {
            content,
            model: response.model,
            tokens_in,
            tokens_out,
            tool_calls,
            stop_reason,
        })
    }
}

#[async_trait]
impl AiProvider for LocalProvider {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Local
    }

    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let base = request.base_url.as_deref().ok_or_else(|| {
            ProviderError::RequestFailed("Base URL is required for Local provider".to_string())
        })?;

        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));

        let openai_request = OpenAiRequest {
            model: request.model.clone(),
            messages: Self::build_messages(request.system_prompt.as_deref(), &request.messages),
            stream: false,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: Self::convert_tools(&request.tools),
            tool_choice: (!request.tools.is_empty()).then_some("auto"),
            parallel_tool_calls: (!request.tools.is_empty() && request.single_tool).then_some(false),
        };

        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&openai_request);

        if let Some(auth) = Self::build_auth_header(&request.api_key) {
            req = req.header("Authorization", auth);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: None,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Self::parse_response(openai_response)
    }
}
