//! Client SDK for the Qianfan LLM inference API.
//!
//! Requests are authenticated either with BCE `bce-auth-v1` signatures
//! (access key / secret key) or with an OAuth access token (API key / secret
//! key). Streaming responses are decoded from SSE into a [`Stream`] that can
//! be consumed once, split with [`Stream::tee`], or aborted.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod stream;
pub mod transport;

mod util;

pub use client::BaseClient;
pub use config::ClientConfig;
pub use error::{QianfanError, Result};
pub use stream::{Stream, StreamIter};
