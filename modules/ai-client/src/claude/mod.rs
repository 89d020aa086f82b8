mod client;
pub(crate) mod types;

use std::time::Duration;

use crate::error::{AiError, Result};
use crate::schema::StructuredOutput;
use crate::util::parse_json_reply;

use client::ClaudeClient;
use types::*;

const STRUCTURED_TOOL: &str = "respond";

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Bound every request to `timeout`; an expired request surfaces as [`AiError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key, self.http.clone());
        match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        }
    }

    /// Ask for a `T`, delivered through a forced tool call whose input schema is `T`'s.
    pub async fn structured<T: StructuredOutput>(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<T> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .max_tokens(4096)
            .temperature(0.0)
            .forced_tool(ToolDefinitionWire {
                name: STRUCTURED_TOOL.to_string(),
                description: format!("Return the {} result", T::output_name()),
                input_schema: T::strict_schema(),
            });

        let response = self.client().chat(&request).await?;

        if let Some(input) = response.tool_input(STRUCTURED_TOOL) {
            return serde_json::from_value(input.clone())
                .map_err(|e| AiError::Parse(format!("Failed to deserialize tool input: {e}")));
        }

        // Some models answer in plain text despite the forced tool.
        match response.text() {
            Some(text) => parse_json_reply(text),
            None => Err(AiError::Parse("No structured output in Claude response".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_model_and_base_url() {
        let ai = Claude::new("sk-ant-test", "claude-3-5-haiku-latest")
            .with_base_url("https://proxy.internal");
        assert_eq!(ai.model, "claude-3-5-haiku-latest");
        assert_eq!(ai.base_url.as_deref(), Some("https://proxy.internal"));
    }

    #[test]
    fn forced_tool_sets_tool_choice() {
        let request = ChatRequest::new("m").forced_tool(ToolDefinitionWire {
            name: "respond".into(),
            description: "d".into(),
            input_schema: serde_json::json!({"type": "object"}),
        });
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["tool_choice"]["name"], "respond");
        assert_eq!(body["tools"][0]["name"], "respond");
    }

    #[test]
    fn tool_input_is_found_by_name() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "id": "t1", "name": "respond", "input": {"ok": true}}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();
        assert_eq!(response.tool_input("respond").unwrap()["ok"], true);
        assert_eq!(response.text(), Some("thinking"));
    }
}
