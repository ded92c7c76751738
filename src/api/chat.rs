use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Route, Usage};
use crate::client::BaseClient;
use crate::error::QianfanError;
use crate::models::Category;
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Chat request body. `extra` carries model-specific keys verbatim.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatBody {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_citation: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatBody {
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One chat response, or one chunk of a streamed one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub sentence_id: Option<u64>,
    #[serde(default)]
    pub is_end: Option<bool>,
    #[serde(default)]
    pub is_truncated: Option<bool>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub need_clear_history: Option<bool>,
    #[serde(default)]
    pub function_call: Option<Value>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Chat completion over the `chat` family.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    route: Route,
}

impl ChatCompletion {
    #[must_use]
    pub fn new(client: BaseClient) -> Self {
        Self {
            route: Route::new(client, Category::Chat),
        }
    }

    /// Send every request to a caller-deployed endpoint instead of a registered model.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.route.endpoint = Some(endpoint.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`QianfanError::InvalidRequest`] for an unknown model or a body
    /// without messages, and any error from [`BaseClient::send_request`].
    pub async fn chat(&self, model: Option<&str>, body: &ChatBody) -> Result<ChatResponse, QianfanError> {
        self.route.call(model, body).await
    }

    /// # Errors
    ///
    /// See [`ChatCompletion::chat`].
    pub async fn chat_stream(
        &self,
        model: Option<&str>,
        body: &ChatBody,
    ) -> Result<Stream<ChatResponse>, QianfanError> {
        self.route.call_stream(model, body).await
    }
}
