//! Typed facades over [`BaseClient`](crate::client::BaseClient).

pub mod chat;
pub mod completions;
pub mod embedding;

pub use chat::{ChatBody, ChatCompletion, ChatMessage, ChatResponse, Role};
pub use completions::{CompletionBody, CompletionResponse, Completions};
pub use embedding::{Embedding, EmbeddingBody, EmbeddingData, EmbeddingResponse};

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::BaseClient;
use crate::error::QianfanError;
use crate::models::{Category, Target};
use crate::observability::log_usage;
use crate::stream::Stream;

/// Token accounting reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Family plus optional custom endpoint, shared by every facade.
#[derive(Debug, Clone)]
struct Route {
    client: BaseClient,
    category: Category,
    endpoint: Option<String>,
}

impl Route {
    fn new(client: BaseClient, category: Category) -> Self {
        Self {
            client,
            category,
            endpoint: None,
        }
    }

    fn target(&self, model: Option<&str>) -> Result<Target, QianfanError> {
        match &self.endpoint {
            Some(endpoint) => Ok(Target::custom(self.category, endpoint.clone())),
            None => Target::resolve(self.category, model),
        }
    }

    async fn call<B, R>(&self, model: Option<&str>, body: &B) -> Result<R, QianfanError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let target = self.target(model)?;
        let started = Instant::now();
        let value = self.client.send_request(&target, to_body(body)?).await?;
        if let Some(usage) = value
            .get("usage")
            .and_then(|usage| Usage::deserialize(usage).ok())
        {
            log_usage(target.endpoint(), &usage, started.elapsed());
        }
        from_body(value)
    }

    async fn call_stream<B, R>(&self, model: Option<&str>, body: &B) -> Result<Stream<R>, QianfanError>
    where
        B: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let target = self.target(model)?;
        self.client
            .send_stream_request(&target, to_body(body)?)
            .await
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, QianfanError> {
    serde_json::to_value(body)
        .map_err(|e| QianfanError::InvalidRequest(format!("cannot serialize body: {e}")))
}

fn from_body<R: DeserializeOwned>(value: Value) -> Result<R, QianfanError> {
    serde_json::from_value(value).map_err(|e| QianfanError::RequestFailed {
        status: http::StatusCode::OK.as_u16(),
        code: None,
        message: format!("unexpected response shape: {e}"),
    })
}
