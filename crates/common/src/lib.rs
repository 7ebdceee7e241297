//! pgEdge RAG Server common library
//!
//! Shared code for the RAG gateway:
//! - Core request/response and retrieval types
//! - Configuration schema, loading, and validation
//! - Error taxonomy with HTTP mapping
//! - Embedding and completion provider adapters
//! - API credential resolution

pub mod config;
pub mod errors;
pub mod keys;
pub mod providers;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, ErrorCode, Result};
pub use providers::{Completer, Embedder};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result cap applied when neither the request nor the pipeline sets one
pub const DEFAULT_TOP_N: usize = 5;

/// Context token budget applied when the pipeline does not set one
pub const DEFAULT_TOKEN_BUDGET: usize = 4000;

/// System prompt applied when the pipeline does not set one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on the provided context. Answer the question using only the information from the context. If the context doesn't contain enough information to answer, say so. Be concise and accurate in your responses.";
