use async_trait::async_trait;
use reqwest::Client;

use super::models::*;
use crate::models::{ProviderId, Role};
use crate::providers::traits::AiProvider;
use crate::providers::types::*;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct ClaudeProvider {
    client: Client,
}

impl Default for ClaudeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn base_url(custom: Option<&str>) -> &str {
        custom.unwrap_or(DEFAULT_BASE_URL)
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        match serde_json::from_str::<ClaudeErrorResponse>(body) {
            Ok(parsed) => match parsed.error.kind {
                Some(kind) => format!("HTTP {} ({}): {}", status.as_u16(), kind, parsed.error.message),
                None => format!("HTTP {}: {}", status.as_u16(), parsed.error.message),
            },
            Err(_) => format!("HTTP {}: Request failed", status.as_u16()),
        }
    }

    /// System turns travel in the top-level `system` field, not in `messages`.
    fn build_messages(messages: &[ChatMessage]) -> Vec<ClaudeMessage> {
        messages
            .iter()
            .filter_map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => return None,
                };
                Some(ClaudeMessage {
                    role: role.to_string(),
                    content: msg.content.clone(),
                })
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<ClaudeTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|t| ClaudeTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        )
    }

    fn tool_choice(request: &ChatRequest) -> Option<ClaudeToolChoice> {
        (!request.tools.is_empty()).then_some(ClaudeToolChoice {
            kind: "auto",
            disable_parallel_tool_use: request.single_tool,
        })
    }

    fn stop_reason(raw: Option<&str>) -> Option<StopReason> {
        match raw {
            Some("tool_use") => Some(StopReason::ToolUse),
            Some("max_tokens") => Some(StopReason::MaxTokens),
            Some("refusal") => Some(StopReason::Refusal),
            Some(_) => Some(StopReason::EndTurn),
            None => None,
        }
    }

    fn parse_response(response: ClaudeResponse) -> Result<ChatResponse, ProviderError> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ClaudeResponseBlock::Text { text } => content.push_str(&text),
                ClaudeResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ClaudeResponseBlock::Other => {}
            }
        }

        let stop_reason = Self::stop_reason(response.stop_reason.as_deref());
        // A refusal may carry no blocks at all; the interpreter still needs to see it.
        if content.is_empty() && tool_calls.is_empty() && stop_reason != Some(StopReason::Refusal) {
            return Err(ProviderError::InvalidResponse(
                "No content in response".to_string(),
            ));
        }

        let (tokens_in, tokens_out) = response
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
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
impl AiProvider for ClaudeProvider {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Claude
    }

    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let base = Self::base_url(request.base_url.as_deref());
        let url = format!("{}/messages", base);

        let claude_request = ClaudeRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: Self::build_messages(&request.messages),
            system: request.system_prompt.clone(),
            temperature: request.temperature,
            tools: Self::convert_tools(&request.tools),
            tool_choice: Self::tool_choice(&request),
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&claude_request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        // 529 is Anthropic's "overloaded"; treat it like a rate limit.
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 529 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        let claude_response: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Self::parse_response(claude_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_are_not_sent_as_turns() {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: "proposal expired".to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: "pending invoices".to_string(),
            },
        ];
        let built = ClaudeProvider::build_messages(&messages);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].role, "user");
    }

    fn request(tools: Vec<ToolDefinition>) -> ChatRequest {
        ChatRequest {
            api_key: "sk-test".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            messages: Vec::new(),
            base_url: None,
            temperature: None,
            system_prompt: None,
            max_tokens: None,
            tools,
            single_tool: true,
        }
    }

    #[test]
    fn test_single_tool_disables_parallel_use() {
        assert!(ClaudeProvider::tool_choice(&request(Vec::new())).is_none());

        let tools = vec![ToolDefinition {
            name: "search_records".to_string(),
            description: "List invoices".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let choice = ClaudeProvider::tool_choice(&request(tools)).unwrap();
        let json = serde_json::to_value(&choice).unwrap();
        assert_eq!(json, serde_json::json!({"type": "auto", "disable_parallel_tool_use": true}));
    }

    #[test]
    fn test_refusal_without_blocks_is_a_response() {
        let body = serde_json::json!({
            "content": [],
            "model": "claude-sonnet-4-5",
            "stop_reason": "refusal"
        });
        let parsed = ClaudeProvider::parse_response(serde_json::from_value(body).unwrap()).unwrap();
        assert_eq!(parsed.stop_reason, Some(StopReason::Refusal));
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn test_error_body_keeps_error_type() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let message =
            ClaudeProvider::parse_error_message(reqwest::StatusCode::SERVICE_UNAVAILABLE, body);
        assert_eq!(message, "HTTP 503 (overloaded_error): Overloaded");
    }

    #[test]
    fn test_response_blocks_parse_tool_use() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "Searching."},
                {"type": "tool_use", "id": "toolu_1", "name": "search_records", "input": {"filter": {"statuses": ["pending"]}}}
            ],
            "model": "claude-sonnet-4-5",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let parsed = ClaudeProvider::parse_response(serde_json::from_value(body).unwrap()).unwrap();
        assert_eq!(parsed.content, "Searching.");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "search_records");
        assert_eq!(parsed.tool_calls[0].arguments["filter"]["statuses"][0], "pending");
        assert_eq!(parsed.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(parsed.tokens_out, Some(5));
    }
}
