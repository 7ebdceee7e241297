//! Pipeline construction and lifetime
//!
//! Pipelines are built once from the validated configuration, live for
//! the whole process, and are torn down at shutdown. Each pipeline
//! exclusively owns its connection pool and provider adapters.
//!
//! Effective settings cascade pipeline > defaults; credentials resolve
//! per provider the pipeline actually uses.

use crate::orchestrator::{QueryOrchestrator, RetrievalOptions};
use pgrag_common::config::{ApiKeyPaths, AppConfig, LlmConfig, PipelineConfig};
use pgrag_common::errors::{AppError, Result};
use pgrag_common::keys::{load_provider_key, LoadedKeys};
use pgrag_common::providers::{create_completer, create_embedder, Completer, Embedder, Provider};
use pgrag_common::types::PipelineInfo;
use pgrag_search::db::{Db, DocumentStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One fully-constructed RAG pipeline
pub struct Pipeline {
    name: String,
    description: String,
    pool: Option<Db>,
    orchestrator: QueryOrchestrator,
}

impl Pipeline {
    /// Assemble a pipeline from already-built parts
    ///
    /// Used directly by tests; production pipelines come from
    /// [`PipelineManager::from_config`].
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        tables: Vec<pgrag_common::config::TableConfig>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            pool: None,
            orchestrator: QueryOrchestrator::new(store, embedder, completer, tables, options),
        }
    }

    fn with_pool(mut self, pool: Db) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> PipelineInfo {
        PipelineInfo {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }

    /// Close the owned connection pool, if any
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

/// Owns every pipeline for the lifetime of the process
///
/// Construction and teardown take the write lock; lookups share the
/// read lock.
pub struct PipelineManager {
    pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
}

impl PipelineManager {
    /// Build every configured pipeline
    ///
    /// If any pipeline fails, pools opened for earlier pipelines are
    /// closed before the error is returned.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let mut built: Vec<Arc<Pipeline>> = Vec::new();

        for pipeline_cfg in &config.pipelines {
            match build_pipeline(pipeline_cfg, config).await {
                Ok(pipeline) => {
                    info!(pipeline = %pipeline.name(), "pipeline ready");
                    built.push(Arc::new(pipeline));
                }
                Err(err) => {
                    for pipeline in &built {
                        pipeline.close().await;
                    }
                    return Err(AppError::Configuration {
                        message: format!("pipeline {}: {}", pipeline_cfg.name, err),
                    });
                }
            }
        }

        Ok(Self::with_pipelines_arc(built))
    }

    /// Manager over pre-built pipelines
    pub fn with_pipelines(pipelines: Vec<Pipeline>) -> Self {
        Self::with_pipelines_arc(pipelines.into_iter().map(Arc::new).collect())
    }

    fn with_pipelines_arc(pipelines: Vec<Arc<Pipeline>>) -> Self {
        let map = pipelines
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            pipelines: RwLock::new(map),
        }
    }

    /// All pipelines, sorted by name
    pub async fn list(&self) -> Vec<PipelineInfo> {
        let mut infos: Vec<PipelineInfo> = self
            .pipelines
            .read()
            .await
            .values()
            .map(|p| p.info())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Look up a pipeline by name
    pub async fn get(&self, name: &str) -> Result<Arc<Pipeline>> {
        self.pipelines
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::PipelineNotFound { name: name.into() })
    }

    /// Tear down all pipelines; safe to call more than once
    pub async fn close(&self) {
        let drained: Vec<Arc<Pipeline>> = self.pipelines.write().await.drain().map(|(_, p)| p).collect();
        for pipeline in drained {
            pipeline.close().await;
        }
    }
}

async fn build_pipeline(cfg: &PipelineConfig, app: &AppConfig) -> Result<Pipeline> {
    let defaults = app.defaults.as_ref();

    let embedding_llm = effective_llm(
        cfg.embedding_llm.as_ref(),
        defaults.and_then(|d| d.embedding_llm.as_ref()),
    )
    .ok_or_else(|| AppError::Configuration {
        message: "no embedding_llm configured (pipeline or defaults)".into(),
    })?;

    let rag_llm = effective_llm(cfg.rag_llm.as_ref(), defaults.and_then(|d| d.rag_llm.as_ref()))
        .ok_or_else(|| AppError::Configuration {
            message: "no rag_llm configured (pipeline or defaults)".into(),
        })?;

    let keys = resolve_keys(cfg, app, &embedding_llm, &rag_llm)?;

    let embedder = create_embedder(&embedding_llm, &keys)?;
    let completer = create_completer(&rag_llm, &keys)?;

    let pool = Db::connect(&cfg.database).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(pool.clone());

    let options = RetrievalOptions {
        top_n: cfg.top_n.or(defaults.and_then(|d| d.top_n)),
        token_budget: cfg.token_budget.or(defaults.and_then(|d| d.token_budget)),
        system_prompt: cfg.system_prompt.clone(),
        hybrid_enabled: cfg
            .search
            .as_ref()
            .and_then(|s| s.hybrid_enabled)
            .unwrap_or(true),
        vector_weight: cfg
            .search
            .as_ref()
            .and_then(|s| s.vector_weight)
            .unwrap_or(0.5),
    };

    Ok(Pipeline::new(
        cfg.name.clone(),
        cfg.description.clone().unwrap_or_default(),
        store,
        embedder,
        completer,
        cfg.tables.clone(),
        options,
    )
    .with_pool(pool))
}

/// Pick the pipeline's LLM over the defaults one; a pipeline LLM
/// without a base_url inherits the default's base_url when both name
/// the same provider
fn effective_llm(pipeline: Option<&LlmConfig>, defaults: Option<&LlmConfig>) -> Option<LlmConfig> {
    match (pipeline, defaults) {
        (Some(p), Some(d)) => {
            let mut llm = p.clone();
            if llm.base_url.is_none() && llm.provider.eq_ignore_ascii_case(&d.provider) {
                llm.base_url = d.base_url.clone();
            }
            Some(llm)
        }
        (Some(p), None) => Some(p.clone()),
        (None, Some(d)) => Some(d.clone()),
        (None, None) => None,
    }
}

/// Resolve credentials for the providers this pipeline uses
///
/// Key file paths cascade pipeline > defaults > global; unused
/// providers are never consulted.
fn resolve_keys(
    cfg: &PipelineConfig,
    app: &AppConfig,
    embedding_llm: &LlmConfig,
    rag_llm: &LlmConfig,
) -> Result<LoadedKeys> {
    let mut used = vec![Provider::parse(&embedding_llm.provider)?];
    let rag_provider = Provider::parse(&rag_llm.provider)?;
    if !used.contains(&rag_provider) {
        used.push(rag_provider);
    }

    let mut keys = LoadedKeys::default();
    for provider in used {
        if !provider.requires_key() {
            continue;
        }
        let path = cascaded_key_path(provider, cfg, app);
        let key = load_provider_key(provider, path)?;
        keys.set(provider, key);
    }
    Ok(keys)
}

fn key_path(provider: Provider, paths: &ApiKeyPaths) -> Option<&str> {
    match provider {
        Provider::OpenAi => paths.openai.as_deref(),
        Provider::Anthropic => paths.anthropic.as_deref(),
        Provider::Voyage => paths.voyage.as_deref(),
        Provider::Ollama => None,
    }
}

fn cascaded_key_path<'a>(
    provider: Provider,
    cfg: &'a PipelineConfig,
    app: &'a AppConfig,
) -> Option<&'a str> {
    cfg.api_keys
        .as_ref()
        .and_then(|paths| key_path(provider, paths))
        .or_else(|| {
            app.defaults
                .as_ref()
                .and_then(|d| d.api_keys.as_ref())
                .and_then(|paths| key_path(provider, paths))
        })
        .or_else(|| {
            app.api_keys
                .as_ref()
                .and_then(|paths| key_path(provider, paths))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(provider: &str, model: &str, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: provider.into(),
            model: model.into(),
            base_url: base_url.map(String::from),
        }
    }

    #[test]
    fn pipeline_llm_wins_over_defaults() {
        let chosen = effective_llm(
            Some(&llm("anthropic", "claude-3-5-haiku-latest", None)),
            Some(&llm("openai", "gpt-4o-mini", Some("https://proxy"))),
        )
        .unwrap();
        assert_eq!(chosen.provider, "anthropic");
        // different provider, no base_url inheritance
        assert_eq!(chosen.base_url, None);
    }

    #[test]
    fn base_url_inherits_within_same_provider() {
        let chosen = effective_llm(
            Some(&llm("openai", "gpt-4o", None)),
            Some(&llm("openai", "gpt-4o-mini", Some("https://proxy"))),
        )
        .unwrap();
        assert_eq!(chosen.model, "gpt-4o");
        assert_eq!(chosen.base_url.as_deref(), Some("https://proxy"));
    }

    #[test]
    fn defaults_fill_missing_llm() {
        let chosen = effective_llm(None, Some(&llm("ollama", "llama3.2", None))).unwrap();
        assert_eq!(chosen.provider, "ollama");
        assert!(effective_llm(None, None).is_none());
    }

    #[test]
    fn key_path_cascade_order() {
        let mut app = AppConfig::default();
        app.api_keys = Some(ApiKeyPaths {
            openai: Some("/global/openai".into()),
            ..Default::default()
        });
        app.defaults = Some(pgrag_common::config::DefaultsConfig {
            api_keys: Some(ApiKeyPaths {
                openai: Some("/defaults/openai".into()),
                ..Default::default()
            }),
            ..Default::default()
        });

        let mut cfg = PipelineConfig {
            name: "docs".into(),
            description: None,
            database: Default::default(),
            tables: vec![],
            embedding_llm: None,
            rag_llm: None,
            api_keys: None,
            token_budget: None,
            top_n: None,
            system_prompt: None,
            search: None,
        };

        // defaults beat global
        assert_eq!(
            cascaded_key_path(Provider::OpenAi, &cfg, &app),
            Some("/defaults/openai")
        );

        // pipeline beats defaults
        cfg.api_keys = Some(ApiKeyPaths {
            openai: Some("/pipeline/openai".into()),
            ..Default::default()
        });
        assert_eq!(
            cascaded_key_path(Provider::OpenAi, &cfg, &app),
            Some("/pipeline/openai")
        );

        // unset anywhere resolves to none
        assert_eq!(cascaded_key_path(Provider::Voyage, &cfg, &app), None);
    }
}
