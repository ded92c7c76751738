use serde::Serialize;
use serde_json::{Map, Value};

use super::Route;
use crate::client::BaseClient;
use crate::error::QianfanError;
use crate::models::Category;
use crate::stream::Stream;

/// Completion responses share the chat response shape.
pub type CompletionResponse = super::ChatResponse;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionBody {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CompletionBody {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Text completion over the `completions` family.
#[derive(Debug, Clone)]
pub struct Completions {
    route: Route,
}

impl Completions {
    #[must_use]
    pub fn new(client: BaseClient) -> Self {
        Self {
            route: Route::new(client, Category::Completions),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.route.endpoint = Some(endpoint.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`QianfanError::InvalidRequest`] for an unknown model, and any
    /// error from [`BaseClient::send_request`].
    pub async fn completions(
        &self,
        model: Option<&str>,
        body: &CompletionBody,
    ) -> Result<CompletionResponse, QianfanError> {
        self.route.call(model, body).await
    }

    /// # Errors
    ///
    /// See [`Completions::completions`].
    pub async fn completions_stream(
        &self,
        model: Option<&str>,
        body: &CompletionBody,
    ) -> Result<Stream<CompletionResponse>, QianfanError> {
        self.route.call_stream(model, body).await
    }
}
