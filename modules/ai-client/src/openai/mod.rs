mod client;
pub(crate) mod types;

use std::time::Duration;

use crate::error::Result;
use crate::schema::StructuredOutput;
use crate::util::parse_json_reply;

use client::OpenAiClient;
use types::{ChatRequest, WireMessage};

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl OpenAi {
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }


    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.http.clone());
        match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        }
    }

    /// Ask for a `T` using strict `json_schema` response formatting.
    pub async fn structured<T: StructuredOutput>(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<T> {
        let request = ChatRequest::new(&self.model)
            .message(WireMessage::system(system))
            .message(WireMessage::user(user))
            .limits(4096)
            .json_schema(schema_name_for_wire::<T>(), T::strict_schema());

        let content = self.client().chat(&request).await?;
        parse_json_reply(&content)
    }
}

/// OpenAI schema names allow only `[a-zA-Z0-9_-]`.
fn schema_name_for_wire<T: StructuredOutput>() -> String {
    T::output_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_models_use_completion_token_limit() {
        let body = serde_json::to_value(ChatRequest::new("o3-mini").limits(100)).unwrap();
        assert_eq!(body["max_completion_tokens"], 100);
        assert!(body.get("temperature").is_none());

        let body = serde_json::to_value(ChatRequest::new("gpt-4o-mini").limits(100)).unwrap();
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn structured_request_is_strict() {
        let request = ChatRequest::new("gpt-4o-mini")
            .json_schema("verdict", serde_json::json!({"type": "object"}));
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn schema_names_are_wire_safe() {
        assert_eq!(schema_name_for_wire::<Vec<String>>(), "Array_of_String");
    }
}
