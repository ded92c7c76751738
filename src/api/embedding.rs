use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Route, Usage};
use crate::client::BaseClient;
use crate::error::QianfanError;
use crate::models::Category;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingBody {
    pub input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EmbeddingBody {
    #[must_use]
    pub fn new<I, S>(input: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: input.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmbeddingData {
    #[serde(default)]
    pub object: String,
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub data: Vec<EmbeddingData>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Text embeddings over the `embeddings` family.
#[derive(Debug, Clone)]
pub struct Embedding {
    route: Route,
}

impl Embedding {
    #[must_use]
    pub fn new(client: BaseClient) -> Self {
        Self {
            route: Route::new(client, Category::Embeddings),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.route.endpoint = Some(endpoint.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`QianfanError::InvalidRequest`] for an unknown model or an
    /// empty input list, and any error from [`BaseClient::send_request`].
    pub async fn embedding(
        &self,
        model: Option<&str>,
        body: &EmbeddingBody,
    ) -> Result<EmbeddingResponse, QianfanError> {
        if body.input.is_empty() {
            return Err(QianfanError::InvalidRequest(
                "embedding input must not be empty".to_string(),
            ));
        }
        self.route.call(model, body).await
    }
}
