//! Per-request query pipeline
//!
//! embed -> hybrid-search each table -> dedupe -> budget context ->
//! complete (buffered or streamed). Per-table database failures are
//! downgraded to warnings; embedding and completion failures are fatal
//! to the request.

use pgrag_common::errors::{AppError, Result};
use pgrag_common::providers::{Completer, CompletionRequest, Embedder};
use pgrag_common::types::{ChatMessage, ContextDocument, QueryRequest, QueryResponse, SearchResult, StreamEvent};
use pgrag_common::config::TableConfig;
use pgrag_common::{DEFAULT_SYSTEM_PROMPT, DEFAULT_TOKEN_BUDGET, DEFAULT_TOP_N};
use pgrag_search::db::DocumentStore;
use pgrag_search::fusion::{reciprocal_rank_fusion, DEFAULT_RRF_K};
use pgrag_search::{Bm25Index, Tokenizer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Characters per estimated token
const TOKEN_ESTIMATE_DIVISOR: usize = 4;

/// Truncation is skipped when less than this many tokens remain
const TRUNCATION_FLOOR_TOKENS: usize = 100;

/// Retrieval policy resolved at pipeline construction
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_n: Option<usize>,
    pub token_budget: Option<usize>,
    pub system_prompt: Option<String>,
    pub hybrid_enabled: bool,
    pub vector_weight: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_n: None,
            token_budget: None,
            system_prompt: None,
            hybrid_enabled: true,
            vector_weight: 0.5,
        }
    }
}

/// Executes queries for one pipeline
#[derive(Clone)]
pub struct QueryOrchestrator {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    tables: Vec<TableConfig>,
    options: RetrievalOptions,
}

impl QueryOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        tables: Vec<TableConfig>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            completer,
            tables,
            options,
        }
    }

    /// Run the full pipeline and return a buffered response
    pub async fn execute(&self, req: &QueryRequest) -> Result<QueryResponse> {
        let context = self.retrieve(req).await?;
        let sources = req.include_sources.then(|| context.clone());

        let completion_req = self.completion_request(req, context);
        let response = self.completer.complete(&completion_req).await?;

        Ok(QueryResponse {
            answer: response.content,
            sources,
            tokens_used: response.tokens_used,
        })
    }

    /// Run the full pipeline, emitting chunk events as the provider
    /// produces them
    ///
    /// Every exit path terminates the stream with exactly one `done`
    /// or one `error` event; dropping the receiver cancels the
    /// provider upstream.
    pub fn execute_stream(&self, req: QueryRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();

        tokio::spawn(async move {
            let context = match this.retrieve(&req).await {
                Ok(context) => context,
                Err(err) => {
                    let _ = tx.send(StreamEvent::Error { error: err.to_string() }).await;
                    return;
                }
            };

            let completion_req = this.completion_request(&req, context);
            let mut stream = match this.completer.complete_stream(&completion_req).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.send(StreamEvent::Error { error: err.to_string() }).await;
                    return;
                }
            };

            while let Some(chunk) = stream.chunks.recv().await {
                if let Some(reason) = &chunk.finish_reason {
                    debug!(finish_reason = %reason, tokens = ?chunk.tokens_used, "stream finished");
                }
                if chunk.content.is_empty() {
                    continue;
                }
                if tx
                    .send(StreamEvent::Chunk {
                        content: chunk.content,
                    })
                    .await
                    .is_err()
                {
                    // Client went away; dropping the provider stream
                    // aborts the upstream read
                    return;
                }
            }

            // The chunk channel is closed, so the error slot is settled
            match stream.error.try_recv() {
                Ok(err) => {
                    let _ = tx.send(StreamEvent::Error { error: err.to_string() }).await;
                }
                Err(_) => {
                    let _ = tx.send(StreamEvent::Done).await;
                }
            }
        });

        rx
    }

    fn effective_top_n(&self, req: &QueryRequest) -> usize {
        match req.top_n {
            Some(n) if n > 0 => n as usize,
            _ => self.options.top_n.unwrap_or(DEFAULT_TOP_N),
        }
    }

    fn effective_budget(&self) -> usize {
        self.options.token_budget.unwrap_or(DEFAULT_TOKEN_BUDGET)
    }

    /// Embed the query, search every table source, fuse, dedupe, and
    /// pack the context under the token budget
    async fn retrieve(&self, req: &QueryRequest) -> Result<Vec<ContextDocument>> {
        let top_n = self.effective_top_n(req);
        let embedding = self.embedder.embed(&req.query).await?;

        let mut pool: Vec<(SearchResult, String)> = Vec::new();
        for source in &self.tables {
            let results = match self.search_source(req, &embedding, source, top_n).await {
                Ok(results) => results,
                // Transient database failures degrade to a warning;
                // anything else (e.g. a bad filter) is fatal
                Err(AppError::Database { message }) => {
                    warn!(table = %source.table, error = %message, "search failed, skipping source");
                    continue;
                }
                Err(err) => return Err(err),
            };
            pool.extend(results.into_iter().map(|r| (r, source.table.clone())));
        }

        let deduped = dedupe(pool, top_n);
        if deduped.is_empty() {
            return Err(AppError::NoDocumentsFound);
        }

        Ok(pack_context(deduped, self.effective_budget()))
    }

    /// Vector search plus per-query BM25, fused with RRF
    ///
    /// Hybrid is skipped when disabled or when the vector weight sits
    /// at the pure-vector endpoint; a failed document fetch falls back
    /// to vector-only results for this source.
    async fn search_source(
        &self,
        req: &QueryRequest,
        embedding: &[f32],
        source: &TableConfig,
        top_n: usize,
    ) -> Result<Vec<SearchResult>> {
        let fetch_n = top_n * 2;
        let vector_results = self
            .store
            .vector_search(embedding, source, fetch_n, req.filter.as_ref())
            .await?;

        if !self.options.hybrid_enabled || self.options.vector_weight >= 1.0 {
            let mut results = vector_results;
            results.truncate(top_n);
            return Ok(results);
        }

        let documents = match self.store.fetch_documents(source, req.filter.as_ref()).await {
            Ok(documents) => documents,
            Err(AppError::Database { message }) => {
                warn!(table = %source.table, error = %message, "document fetch failed, using vector results only");
                let mut results = vector_results;
                results.truncate(top_n);
                return Ok(results);
            }
            Err(err) => return Err(err),
        };

        let mut index = Bm25Index::new(Tokenizer::new());
        let mut contents: HashMap<String, String> = HashMap::with_capacity(documents.len());
        for (id, content) in documents {
            index.add(id.clone(), &content);
            contents.insert(id, content);
        }

        let keyword_results: Vec<SearchResult> = index
            .search(&req.query, fetch_n)
            .into_iter()
            .filter_map(|hit| {
                contents.get(&hit.id).map(|content| SearchResult {
                    id: Some(hit.id),
                    content: content.clone(),
                    score: hit.score,
                })
            })
            .collect();

        Ok(reciprocal_rank_fusion(
            vector_results,
            keyword_results,
            DEFAULT_RRF_K,
            top_n,
        ))
    }

    fn completion_request(&self, req: &QueryRequest, context: Vec<ContextDocument>) -> CompletionRequest {
        let mut messages = req.messages.clone().unwrap_or_default();
        messages.push(ChatMessage::user(req.query.clone()));

        CompletionRequest {
            system_prompt: self
                .options
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            context,
            messages,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Keep the first occurrence of each document, up to `top_n`
///
/// The key is the id when present and non-empty, otherwise the full
/// content.
fn dedupe(pool: Vec<(SearchResult, String)>, top_n: usize) -> Vec<(SearchResult, String)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (result, table) in pool {
        if !seen.insert(result.key().to_string()) {
            continue;
        }
        out.push((result, table));
        if out.len() == top_n {
            break;
        }
    }
    out
}

fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(TOKEN_ESTIMATE_DIVISOR)
}

/// Accept documents in order until the budget would overflow; the
/// first overflowing document is truncated in when enough budget
/// remains
fn pack_context(documents: Vec<(SearchResult, String)>, budget: usize) -> Vec<ContextDocument> {
    let mut packed = Vec::new();
    let mut used = 0;

    for (result, table) in documents {
        let cost = estimate_tokens(&result.content);
        if used + cost <= budget {
            used += cost;
            packed.push(ContextDocument {
                content: result.content,
                score: result.score,
                source: Some(table),
            });
            continue;
        }

        let remaining = budget - used;
        if remaining > TRUNCATION_FLOOR_TOKENS {
            packed.push(ContextDocument {
                content: truncate_content(&result.content, remaining * TOKEN_ESTIMATE_DIVISOR),
                score: result.score,
                source: Some(table),
            });
        }
        break;
    }

    packed
}

/// Cut to the character allowance, preferring the last sentence
/// boundary inside it, and mark the cut with an ellipsis
///
/// The ellipsis is counted against the allowance so the packed
/// estimate never exceeds the budget.
fn truncate_content(content: &str, max_chars: usize) -> String {
    let budgeted = max_chars.saturating_sub(3);
    let mut end = budgeted.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = &content[..end];

    let cut = match prefix.rfind(". ") {
        Some(idx) => &prefix[..idx + 1],
        None => prefix,
    };
    format!("{cut}...")
}
