//! Static model registry: model name to endpoint suffix and accepted body keys.

use std::fmt;

use serde_json::Value;

use crate::error::QianfanError;

/// API family, which is also the URL path segment before the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Chat,
    Completions,
    Embeddings,
}

impl Category {
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            Category::Chat => "chat",
            Category::Completions => "completions",
            Category::Embeddings => "embeddings",
        }
    }

    /// Body keys every request in this family must carry.
    #[must_use]
    pub fn required_keys(self) -> &'static [&'static str] {
        match self {
            Category::Chat => &["messages"],
            Category::Completions => &["prompt"],
            Category::Embeddings => &["input"],
        }
    }

    /// Model used when the caller names none.
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Category::Chat => "ERNIE-Bot-turbo",
            Category::Completions => "SQLCoder-7B",
            Category::Embeddings => "Embedding-V1",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub endpoint: &'static str,
    pub category: Category,
    pub required_keys: &'static [&'static str],
    pub optional_keys: &'static [&'static str],
}

const ERNIE_CHAT_KEYS: &[&str] = &[
    "stream",
    "temperature",
    "top_p",
    "penalty_score",
    "system",
    "user_id",
    "stop",
    "disable_search",
    "enable_citation",
    "functions",
];
const OPEN_CHAT_KEYS: &[&str] = &[
    "stream",
    "user_id",
    "temperature",
    "top_k",
    "top_p",
    "penalty_score",
    "stop",
];
const COMPLETION_KEYS: &[&str] = &[
    "stream",
    "user_id",
    "temperature",
    "top_k",
    "top_p",
    "penalty_score",
    "stop",
];
const EMBEDDING_KEYS: &[&str] = &["user_id"];

const fn chat(name: &'static str, endpoint: &'static str, optional_keys: &'static [&'static str]) -> ModelSpec {
    ModelSpec {
        name,
        endpoint,
        category: Category::Chat,
        required_keys: &["messages"],
        optional_keys,
    }
}

const fn completion(name: &'static str, endpoint: &'static str) -> ModelSpec {
    ModelSpec {
        name,
        endpoint,
        category: Category::Completions,
        required_keys: &["prompt"],
        optional_keys: COMPLETION_KEYS,
    }
}

const fn embedding(name: &'static str, endpoint: &'static str) -> ModelSpec {
    ModelSpec {
        name,
        endpoint,
        category: Category::Embeddings,
        required_keys: &["input"],
        optional_keys: EMBEDDING_KEYS,
    }
}

pub const MODELS: &[ModelSpec] = &[
    chat("ERNIE-Bot-turbo", "eb-instant", ERNIE_CHAT_KEYS),
    chat("ERNIE-Bot", "completions", ERNIE_CHAT_KEYS),
    chat("ERNIE-Bot-4", "completions_pro", ERNIE_CHAT_KEYS),
    chat("ERNIE-Bot-8K", "ernie_bot_8k", ERNIE_CHAT_KEYS),
    chat("BLOOMZ-7B", "bloomz_7b1", OPEN_CHAT_KEYS),
    chat("Qianfan-BLOOMZ-7B-compressed", "qianfan_bloomz_7b_compressed", OPEN_CHAT_KEYS),
    chat("Llama-2-7b-chat", "llama_2_7b", OPEN_CHAT_KEYS),
    chat("Llama-2-13b-chat", "llama_2_13b", OPEN_CHAT_KEYS),
    chat("Llama-2-70b-chat", "llama_2_70b", OPEN_CHAT_KEYS),
    chat("Qianfan-Chinese-Llama-2-7B", "qianfan_chinese_llama_2_7b", OPEN_CHAT_KEYS),
    chat("ChatGLM2-6B-32K", "chatglm2_6b_32k", OPEN_CHAT_KEYS),
    chat("AquilaChat-7B", "aquilachat_7b", OPEN_CHAT_KEYS),
    completion("SQLCoder-7B", "sqlcoder_7b"),
    completion("CodeLlama-7b-Instruct", "codellama_7b_instruct"),
    embedding("Embedding-V1", "embedding-v1"),
    embedding("bge-large-zh", "bge_large_zh"),
    embedding("bge-large-en", "bge_large_en"),
    embedding("tao-8k", "tao_8k"),
];

/// Look up a model by exact name within one family.
#[must_use]
pub fn find(category: Category, name: &str) -> Option<&'static ModelSpec> {
    MODELS
        .iter()
        .find(|spec| spec.category == category && spec.name == name)
}

/// Names of every registered model in one family, in registry order.
pub fn names(category: Category) -> impl Iterator<Item = &'static str> {
    MODELS
        .iter()
        .filter(move |spec| spec.category == category)
        .map(|spec| spec.name)
}

/// Where a request goes: a registered model or a caller-deployed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Model(&'static ModelSpec),
    Custom { category: Category, endpoint: String },
}

impl Target {
    /// Resolve a model name, falling back to the family default for `None`.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::InvalidRequest`] for a name the registry does not know.
    pub fn resolve(category: Category, model: Option<&str>) -> Result<Self, QianfanError> {
        let name = model.unwrap_or_else(|| category.default_model());
        find(category, name).map(Target::Model).ok_or_else(|| {
            QianfanError::InvalidRequest(format!(
                "unknown {category} model '{name}', expected one of: {}",
                names(category).collect::<Vec<_>>().join(", ")
            ))
        })
    }

    #[must_use]
    pub fn custom(category: Category, endpoint: impl Into<String>) -> Self {
        Target::Custom {
            category,
            endpoint: endpoint.into(),
        }
    }

    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Target::Model(spec) => spec.category,
            Target::Custom { category, .. } => *category,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Target::Model(spec) => spec.endpoint,
            Target::Custom { endpoint, .. } => endpoint,
        }
    }

    /// Check the body is an object carrying every required key.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::InvalidRequest`] naming the first missing key.
    pub fn validate_body(&self, body: &Value) -> Result<(), QianfanError> {
        let object = body
            .as_object()
            .ok_or_else(|| QianfanError::InvalidRequest("request body must be a JSON object".to_string()))?;
        let required = match self {
            Target::Model(spec) => spec.required_keys,
            Target::Custom { category, .. } => category.required_keys(),
        };
        for key in required {
            if object.get(*key).map_or(true, Value::is_null) {
                return Err(QianfanError::InvalidRequest(format!(
                    "request body is missing required key '{key}' for {}",
                    self.endpoint()
                )));
            }
        }
        if let Target::Model(spec) = self {
            for key in object.keys() {
                let known = spec.required_keys.contains(&key.as_str())
                    || spec.optional_keys.contains(&key.as_str())
                    || key == "extra_parameters";
                if !known {
                    tracing::debug!(model = spec.name, key = %key, "body key not listed for model");
                }
            }
        }
        Ok(())
    }
}
