use async_trait::async_trait;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::llm::types::*;
use crate::llm::{ModelRequest, ModelService};
use crate::models::{Conversation, Part, Role, TokenUsage, ToolInvocation};
use crate::tools::ToolSpec;

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
    api_key: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// One model turn: send the messages and tool schemas, and check the
    /// reply against the response contract.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<Value>,
    ) -> Result<ModelResponse, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let request = OpenAIChatRequest {
            model: self.config.model.clone(),
            messages,
            tools: (!tools.is_empty()).then_some(tools),
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            stream: false,
        };
        let reply = self.post_with_retry(&request).await?;
        tracing::debug!(id = ?reply.id, model = ?reply.model, "model reply received");
        parse_response(reply)
    }

    async fn post_with_retry(
        &self,
        request: &OpenAIChatRequest,
    ) -> Result<OpenAIChatResponse, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let headers = self.headers()?;

        let attempt = || async {
            let response = self
                .http
                .post(&url)
                .headers(headers.clone())
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    BackoffError::transient(if e.is_timeout() {
                        LlmError::Timeout
                    } else {
                        LlmError::Http(e.to_string())
                    })
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::debug!(status = status.as_u16(), %body, "model service error");
                return Err(classify_status(status, body));
            }
            // An undecodable success body is final.
            response
                .json::<OpenAIChatResponse>()
                .await
                .map_err(|e| BackoffError::permanent(LlmError::InvalidResponse(e.to_string())))
        };

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(4),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        retry(policy, attempt).await
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| LlmError::Http("API key is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(obj) = self.config.extra_headers.as_object() {
            for (key, value) in obj {
                if let Some(val_str) = value.as_str() {
                    if let (Ok(name), Ok(value)) = (
                        HeaderName::from_bytes(key.as_bytes()),
                        HeaderValue::from_str(val_str),
                    ) {
                        headers.insert(name, value);
                    }
                }
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl ModelService for LlmClient {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError> {
        let messages = to_chat_messages(request.system_instruction, request.conversation);
        let tools = request.tools.iter().map(to_openai_tool).collect();
        self.complete(messages, tools).await
    }
}

/// 429 and 5xx are worth another attempt; any other failure status is final.
fn classify_status(status: StatusCode, body: String) -> BackoffError<LlmError> {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackoffError::transient(LlmError::RateLimited),
        StatusCode::UNAUTHORIZED => BackoffError::permanent(LlmError::Api {
            status: 401,
            message: "Invalid API key".to_string(),
        }),
        s if s.is_server_error() => BackoffError::transient(LlmError::Api {
            status: s.as_u16(),
            message: body,
        }),
        s => BackoffError::permanent(LlmError::Api {
            status: s.as_u16(),
            message: body,
        }),
    }
}

/// Flatten the conversation into chat messages, system prompt first.
pub fn to_chat_messages(system_instruction: &str, conversation: &Conversation) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system".into(),
        content: Some(system_instruction.to_string()),
        tool_calls: None,
        tool_call_id: None,
    }];

    for turn in conversation.turns() {
        match turn.role {
            Role::User => messages.push(ChatMessage {
                role: "user".into(),
                content: Some(turn.text()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::Model => {
                let calls: Vec<ToolCall> = turn
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Call(call) => Some(ToolCall {
                            id: call.id.clone(),
                            call_type: "function".into(),
                            function: ToolFunction {
                                name: call.name.clone(),
                                arguments: Value::Object(call.arguments.clone()).to_string(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();
                let text = turn.text();
                messages.push(ChatMessage {
                    role: "assistant".into(),
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if calls.is_empty() { None } else { Some(calls) },
                    tool_call_id: None,
                });
            }
            Role::Tool => {
                for part in &turn.parts {
                    if let Part::Response(response) = part {
                        messages.push(ChatMessage {
                            role: "tool".into(),
                            content: Some(response.content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(response.call_id.clone()),
                        });
                    }
                }
            }
        }
    }

    messages
}

fn to_openai_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": spec,
    })
}

/// Check the reply against the response contract and convert it.
pub fn parse_response(response: OpenAIChatResponse) -> Result<ModelResponse, LlmError> {
    let usage = response
        .usage
        .ok_or_else(|| LlmError::InvalidResponse("missing usage metadata".to_string()))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

    let mut invocations = vec![];
    for call in choice.message.tool_calls.unwrap_or_default() {
        if call.function.name.is_empty() {
            return Err(LlmError::InvalidResponse(
                "tool call without a function name".to_string(),
            ));
        }
        let arguments = parse_arguments(&call.function.name, &call.function.arguments)?;
        let id = if call.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            call.id
        };
        invocations.push(ToolInvocation {
            id,
            name: call.function.name,
            arguments,
        });
    }

    Ok(ModelResponse {
        text: choice.message.content,
        invocations,
        usage: TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        },
    })
}

fn parse_arguments(name: &str, raw: &str) -> Result<Map<String, Value>, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(LlmError::InvalidResponse(format!(
            "arguments for {name} are not a JSON object"
        ))),
        Err(e) => Err(LlmError::InvalidResponse(format!(
            "arguments for {name} are not valid JSON: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationTurn, ToolResponse};

    fn response_json(value: Value) -> OpenAIChatResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_messages_pair_calls_with_results() {
        let call = ToolInvocation {
            id: "call_a".into(),
            name: "get_file_content".into(),
            arguments: json!({ "file_path": "main.py" }).as_object().cloned().unwrap(),
        };
        let mut conversation = Conversation::new();
        conversation.push(ConversationTurn::user("what does main.py do?"));
        conversation.push(ConversationTurn::model(None, &[call]));
        conversation.push(ConversationTurn::tool(ToolResponse {
            call_id: "call_a".into(),
            name: "get_file_content".into(),
            content: "print('hi')".into(),
            error: None,
        }));

        let messages = to_chat_messages("be helpful", &conversation);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);

        let assistant = &messages[2];
        assert_eq!(assistant.content, None);
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].function.arguments, r#"{"file_path":"main.py"}"#);

        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(messages[3].content.as_deref(), Some("print('hi')"));
    }

    #[test]
    fn test_tool_schema_is_wrapped_as_function() {
        let catalog = crate::tools::tool_catalog("py");
        let value = to_openai_tool(&catalog[1]);
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "get_file_content");
        assert_eq!(value["function"]["parameters"]["required"], json!(["file_path"]));
    }

    #[test]
    fn test_parse_final_text() {
        let parsed = parse_response(response_json(json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "done" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        })))
        .unwrap();

        assert_eq!(parsed.text.as_deref(), Some("done"));
        assert!(parsed.invocations.is_empty());
        assert_eq!(parsed.usage.prompt_tokens, 12);
        assert_eq!(parsed.usage.completion_tokens, 3);
    }

    #[test]
    fn test_parse_tool_calls_in_order() {
        let parsed = parse_response(response_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": null, "tool_calls": [
                { "id": "c1", "type": "function", "function": { "name": "write_file", "arguments": "{\"file_path\":\"a.txt\",\"content\":\"x\"}" } },
                { "id": "", "type": "function", "function": { "name": "get_files_info", "arguments": "" } }
            ]}}],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })))
        .unwrap();

        assert_eq!(parsed.invocations.len(), 2);
        assert_eq!(parsed.invocations[0].id, "c1");
        assert_eq!(parsed.invocations[0].name, "write_file");
        assert_eq!(parsed.invocations[0].arguments["file_path"], "a.txt");
        assert!(parsed.invocations[1].id.starts_with("call_"));
        assert!(parsed.invocations[1].arguments.is_empty());
    }

    #[test]
    fn test_missing_usage_is_invalid() {
        let err = parse_response(response_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }]
        })))
        .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_no_choices_is_invalid() {
        let err = parse_response(response_json(json!({
            "choices": [],
            "usage": { "prompt_tokens": 1, "completion_tokens": 0 }
        })))
        .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_non_object_arguments_are_invalid() {
        let err = parse_response(response_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": null, "tool_calls": [
                { "id": "c1", "type": "function", "function": { "name": "get_files_info", "arguments": "[1, 2]" } }
            ]}}],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })))
        .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(msg) if msg.contains("not a JSON object")));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            BackoffError::Transient { err: LlmError::RateLimited, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream".into()),
            BackoffError::Transient { err: LlmError::Api { status: 502, .. }, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "nope".into()),
            BackoffError::Permanent(LlmError::Api { status: 401, .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "no such model".into()),
            BackoffError::Permanent(LlmError::Api { status: 404, ref message }) if message == "no such model"
        ));
    }
}
