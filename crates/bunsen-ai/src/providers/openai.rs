//! OpenAI-compatible Chat Completions provider (chat + vision)

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    error::{Error, Result},
    provider::{ChatProvider, VisionProvider},
    types::{Content, Context, ModelConfig, Tool, Turn, UsageStats},
};

/// OpenAI API client implementing both chat and vision
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: ModelConfig,
}

impl OpenAIProvider {
    /// Create a provider with an explicit API key
    pub fn new(api_key: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model,
        }
    }

    /// Create from the OPENAI_API_KEY environment variable
    pub fn from_env(model: ModelConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(api_key, model))
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.model.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "chat completion request failed");
            if let Ok(err) = serde_json::from_str::<ApiErrorEnvelope>(&text) {
                return Err(Error::api(
                    err.error.error_type.unwrap_or_else(|| status.to_string()),
                    err.error.message,
                ));
            }
            return Err(Error::api(status.to_string(), text));
        }

        Ok(response.json().await?)
    }

    fn build_request(&self, context: &Context) -> ChatRequest {
        let mut messages = Vec::new();

        if let Some(ref system_prompt) = context.system_prompt {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: Some(ApiContent::Text(system_prompt.clone())),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for turn in &context.turns {
            messages.push(convert_turn(turn));
        }

        let tools = if context.tools.is_empty() {
            None
        } else {
            Some(context.tools.iter().map(convert_tool).collect())
        };
        let has_tools = tools.is_some();

        ChatRequest {
            model: self.model.id.clone(),
            messages,
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
            tools,
            tool_choice: has_tools.then(|| serde_json::json!("auto")),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    async fn complete(&self, context: &Context) -> Result<Turn> {
        let request = self.build_request(context);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = context.tools.len(),
            "sending chat completion request"
        );
        let response = self.post_chat(&request).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("no choices in response".into()))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(Content::text(text));
            }
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            // Arguments arrive as a JSON-encoded string; tolerate malformed
            // payloads by passing them through as a raw string value.
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::String(call.function.arguments));
            content.push(Content::tool_call(call.id, call.function.name, arguments));
        }

        let usage = response
            .usage
            .map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
                model_name: Some(response.model.clone()),
            })
            .unwrap_or_else(|| UsageStats {
                model_name: Some(response.model.clone()),
                ..Default::default()
            });

        Ok(Turn::model(content, usage))
    }
}

#[async_trait]
impl VisionProvider for OpenAIProvider {
    async fn explain(
        &self,
        question: &str,
        image_paths: &[&Path],
        system_prompt: &str,
    ) -> Result<String> {
        tracing::debug!(
            model = %self.model.id,
            images = image_paths.len(),
            "sending vision request"
        );
        let mut parts = vec![serde_json::json!({"type": "text", "text": question})];
        for path in image_paths {
            parts.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": image_data_url(path)?}
            }));
        }

        let request = serde_json::json!({
            "model": self.model.id,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": parts},
            ],
            "max_tokens": 1000,
        });

        let url = format!("{}/chat/completions", self.model.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.to_string(), text));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::UnexpectedResponse("vision response had no text".into()))
    }
}

/// Turn a local image file into a base64 data URL; URLs pass through.
fn image_data_url(path: &Path) -> Result<String> {
    let display = path.display().to_string();
    if display.starts_with("http://") || display.starts_with("https://") {
        return Ok(display);
    }
    let bytes = std::fs::read(path).map_err(|e| Error::ImageRead {
        path: display,
        source: e,
    })?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    };
    Ok(format!("data:{};base64,{}", mime, encoded))
}

fn convert_turn(turn: &Turn) -> ApiMessage {
    match turn {
        Turn::User { content, .. } => ApiMessage {
            role: "user".to_string(),
            content: Some(ApiContent::Text(join_text(content))),
            tool_calls: None,
            tool_call_id: None,
        },
        Turn::Model { content, .. } => {
            let text = join_text(content);
            let tool_calls: Vec<ApiToolCall> = content
                .iter()
                .filter_map(|c| match c {
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(ApiToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: ApiFunctionCall {
                            name: name.clone(),
                            arguments: arguments.to_string(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            ApiMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then_some(ApiContent::Text(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Turn::ToolResult {
            tool_call_id,
            content,
            ..
        } => ApiMessage {
            role: "tool".to_string(),
            content: Some(ApiContent::Text(join_text(content))),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

fn convert_tool(tool: &Tool) -> ApiTool {
    ApiTool {
        tool_type: "function".to_string(),
        function: ApiFunction {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: Some(tool.parameters.clone()),
        },
    }
}

fn join_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| c.as_text())
        .collect::<Vec<_>>()
        .join("")
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_user_turn() {
        let msg = convert_turn(&Turn::user("what is the mean?"));
        assert_eq!(msg.role, "user");
        match msg.content {
            Some(ApiContent::Text(t)) => assert_eq!(t, "what is the mean?"),
            other => panic!("expected text content, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_model_turn_with_tool_calls() {
        let turn = Turn::model(
            vec![
                Content::text("running code"),
                Content::tool_call("c1", "execute_python", serde_json::json!({"code": "x"})),
            ],
            UsageStats::default(),
        );
        let msg = convert_turn(&turn);
        assert_eq!(msg.role, "assistant");
        let calls = msg.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "execute_python");
        // Arguments must be JSON-encoded as a string on the wire
        let parsed: serde_json::Value =
            serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(parsed["code"], "x");
    }

    #[test]
    fn test_convert_tool_result_turn() {
        let turn = Turn::tool_result("c1", "execute_python", vec![Content::text("42")], false);
        let msg = convert_turn(&turn);
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_parse_response_with_tool_call() {
        let body = r#"{
            "model": "gpt-4o",
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "call_1", "type": "function",
                    "function": {"name": "ask_ai", "arguments": "{\"question\": \"hi\"}"}}]
            }}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.usage.as_ref().unwrap().total_tokens, 15);
    }

    #[test]
    fn test_image_data_url_passthrough_for_urls() {
        let url = image_data_url(Path::new("https://example.com/plot.png")).unwrap();
        assert_eq!(url, "https://example.com/plot.png");
    }

    #[test]
    fn test_image_data_url_missing_file() {
        let err = image_data_url(Path::new("/nonexistent/plot.png")).unwrap_err();
        assert!(matches!(err, Error::ImageRead { .. }));
    }
}
