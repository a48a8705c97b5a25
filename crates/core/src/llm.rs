use crate::config::Settings;
use crate::error::ServiceError;
use crate::models::ChatMessage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Text-in, text-out language model capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String, ServiceError>;
}

/// Client for the Anthropic Messages API.
pub struct AnthropicChatModel {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicChatModel {
    pub fn new(api_key: impl Into<String>, settings: &Settings) -> Result<Self, ServiceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ServiceError::InvalidConfig(
                "missing Anthropic API key".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: Url::parse(&settings.chat_endpoint)?,
            api_key: api_key.trim().to_string(),
            model: settings.chat_model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[async_trait]
impl ChatModel for AnthropicChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: messages
                .iter()
                .map(|message| RequestMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ServiceError::Status {
                service: "anthropic".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response.json().await?;
        collect_text(parsed)
    }
}

fn collect_text(response: MessagesResponse) -> Result<String, ServiceError> {
    let answer = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(text),
            ResponseBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if answer.trim().is_empty() {
        return Err(ServiceError::EmptyResponse("anthropic".to_string()));
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_blocks_are_joined_and_others_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[
                {"type":"thinking","thinking":"..."},
                {"type":"text","text":"Step 1"},
                {"type":"text","text":"Step 2"}
            ]}"#,
        )?;
        assert_eq!(collect_text(response)?, "Step 1\nStep 2");
        Ok(())
    }

    #[test]
    fn response_without_text_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let response: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#)?;
        assert!(matches!(
            collect_text(response),
            Err(ServiceError::EmptyResponse(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let result = AnthropicChatModel::new("  ", &Settings::default());
        assert!(matches!(result, Err(ServiceError::InvalidConfig(_))));
    }

    #[test]
    fn request_body_uses_system_field_and_roles() -> Result<(), Box<dyn std::error::Error>> {
        let messages = [ChatMessage::user("What was approved?"), ChatMessage::assistant("X.")];
        let body = MessagesRequest {
            model: "m",
            max_tokens: 16,
            temperature: 0.1,
            system: "persona",
            messages: messages
                .iter()
                .map(|message| RequestMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
        };
        let value = serde_json::to_value(&body)?;
        assert_eq!(value["system"], "persona");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][1]["role"], "assistant");
        Ok(())
    }
}
