//! Hybrid retrieval for the pgEdge RAG server
//!
//! Provides the pieces the query orchestrator composes per request:
//! - Tokenizer (lowercase, alphanumeric runs, stop-word filter)
//! - In-memory BM25 index, rebuilt per query
//! - Reciprocal rank fusion of vector and keyword rankings
//! - Parameterized filter compiler (the only component that renders
//!   filter SQL)
//! - Database gateway for pgvector similarity search and document
//!   fetch

pub mod bm25;
pub mod db;
pub mod filter;
pub mod fusion;
pub mod tokenizer;

pub use bm25::Bm25Index;
pub use db::{Db, DocumentStore};
pub use filter::CompiledFilter;
pub use tokenizer::Tokenizer;
