//! Configuration for the RAG gateway
//!
//! The server is configured from a single YAML file. Discovery order:
//! - the `--config` flag
//! - `/etc/pgedge/pgedge-rag-server.yaml`
//! - `pgedge-rag-server.yaml` next to the binary
//!
//! First match wins; absence is fatal. Loading validates the whole
//! document up front so that pipeline construction only sees
//! well-formed input.

use crate::errors::{AppError, Result};
use crate::types::ConfigFilter;
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Config file name searched for when `--config` is not given
pub const CONFIG_FILE_NAME: &str = "pgedge-rag-server.yaml";

/// System-wide config location
pub const SYSTEM_CONFIG_PATH: &str = "/etc/pgedge/pgedge-rag-server.yaml";

const VALID_PROVIDERS: &[&str] = &["openai", "anthropic", "voyage", "ollama"];

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Global API key file paths
    pub api_keys: Option<ApiKeyPaths>,

    /// Fallback settings applied to pipelines that do not override them
    pub defaults: Option<DefaultsConfig>,

    /// RAG pipelines served under `/v1/pipelines/{name}`
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub tls: Option<TlsConfig>,

    pub cors: Option<CorsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            tls: None,
            cors: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Paths to API key files, one per provider
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiKeyPaths {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub voyage: Option<String>,
}

/// Settings cascaded into pipelines that do not set their own
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DefaultsConfig {
    pub token_budget: Option<usize>,
    pub top_n: Option<usize>,
    pub embedding_llm: Option<LlmConfig>,
    pub rag_llm: Option<LlmConfig>,
    pub api_keys: Option<ApiKeyPaths>,
}

/// One named RAG pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub database: DatabaseConfig,
    pub tables: Vec<TableConfig>,
    pub embedding_llm: Option<LlmConfig>,
    pub rag_llm: Option<LlmConfig>,
    pub api_keys: Option<ApiKeyPaths>,
    pub token_budget: Option<usize>,
    pub top_n: Option<usize>,
    pub system_prompt: Option<String>,
    pub search: Option<SearchConfig>,
}

/// Connection descriptor for one pipeline's database
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: Option<String>,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub ssl_root_ca: Option<String>,
}

impl DatabaseConfig {
    /// Port, defaulting to the PostgreSQL standard
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(5432)
    }

    /// SSL mode, defaulting to `prefer`
    pub fn ssl_mode(&self) -> &str {
        self.ssl_mode.as_deref().unwrap_or("prefer")
    }
}

/// A (table, text column, vector column) source within a pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    pub table: String,
    pub text_column: String,
    pub vector_column: String,
    pub id_column: Option<String>,
    pub filter: Option<ConfigFilter>,
}

/// Provider + model descriptor for an embedding or completion LLM
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
}

/// Search behavior knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub hybrid_enabled: Option<bool>,
    pub vector_weight: Option<f32>,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl AppConfig {
    /// Load and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("failed to read {}: {}", path.display(), e),
            })?;

        let app: AppConfig = cfg.try_deserialize().map_err(|e| AppError::Configuration {
            message: format!("invalid config {}: {}", path.display(), e),
        })?;

        app.validate()?;
        Ok(app)
    }

    /// Locate the config file: explicit flag, system path, binary directory
    pub fn discover(explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path);
            }
            return Err(AppError::Configuration {
                message: format!("config file not found: {}", path.display()),
            });
        }

        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system.is_file() {
            return Ok(system);
        }

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let local = dir.join(CONFIG_FILE_NAME);
                if local.is_file() {
                    return Ok(local);
                }
            }
        }

        Err(AppError::Configuration {
            message: format!(
                "no config file found; looked at {} and next to the binary (use --config)",
                SYSTEM_CONFIG_PATH
            ),
        })
    }

    /// Reject malformed configurations before any pipeline is built
    pub fn validate(&self) -> Result<()> {
        if let Some(tls) = &self.server.tls {
            if tls.enabled && (tls.cert_file.is_none() || tls.key_file.is_none()) {
                return Err(config_err(
                    "server.tls.enabled requires cert_file and key_file",
                ));
            }
        }

        if self.pipelines.is_empty() {
            return Err(config_err("at least one pipeline must be configured"));
        }

        if let Some(defaults) = &self.defaults {
            validate_llm(defaults.embedding_llm.as_ref(), "defaults.embedding_llm")?;
            validate_llm(defaults.rag_llm.as_ref(), "defaults.rag_llm")?;
        }

        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            pipeline.validate()?;
            if !names.insert(pipeline.name.as_str()) {
                return Err(config_err(format!(
                    "duplicate pipeline name: {}",
                    pipeline.name
                )));
            }
        }

        Ok(())
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(config_err("pipeline name must not be empty"));
        }
        let ctx = &self.name;

        if self.database.host.is_empty() {
            return Err(config_err(format!("pipeline {ctx}: database.host is required")));
        }
        if self.database.database.is_empty() {
            return Err(config_err(format!(
                "pipeline {ctx}: database.database is required"
            )));
        }
        if self.database.port == Some(0) {
            return Err(config_err(format!("pipeline {ctx}: invalid database.port 0")));
        }

        if self.tables.is_empty() {
            return Err(config_err(format!(
                "pipeline {ctx}: at least one table must be configured"
            )));
        }
        for table in &self.tables {
            if table.table.is_empty() || table.text_column.is_empty() || table.vector_column.is_empty()
            {
                return Err(config_err(format!(
                    "pipeline {ctx}: tables require table, text_column and vector_column"
                )));
            }
        }

        validate_llm(
            self.embedding_llm.as_ref(),
            &format!("pipeline {ctx}: embedding_llm"),
        )?;
        validate_llm(self.rag_llm.as_ref(), &format!("pipeline {ctx}: rag_llm"))?;

        if let Some(search) = &self.search {
            if let Some(weight) = search.vector_weight {
                if !(0.0..=1.0).contains(&weight) {
                    return Err(config_err(format!(
                        "pipeline {ctx}: search.vector_weight must be within [0, 1]"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_llm(llm: Option<&LlmConfig>, ctx: &str) -> Result<()> {
    let Some(llm) = llm else { return Ok(()) };
    let provider = llm.provider.to_lowercase();
    if !VALID_PROVIDERS.contains(&provider.as_str()) {
        return Err(config_err(format!(
            "{ctx}: unknown provider {:?} (expected one of {})",
            llm.provider,
            VALID_PROVIDERS.join(", ")
        )));
    }
    if llm.model.is_empty() {
        return Err(config_err(format!("{ctx}: model is required")));
    }
    Ok(())
}

fn config_err(message: impl Into<String>) -> AppError {
    AppError::Configuration {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            api_keys: None,
            defaults: None,
            pipelines: vec![PipelineConfig {
                name: "docs".into(),
                description: Some("test".into()),
                database: DatabaseConfig {
                    host: "localhost".into(),
                    database: "corpus".into(),
                    ..Default::default()
                },
                tables: vec![TableConfig {
                    table: "documents".into(),
                    text_column: "content".into(),
                    vector_column: "embedding".into(),
                    id_column: None,
                    filter: None,
                }],
                embedding_llm: Some(LlmConfig {
                    provider: "openai".into(),
                    model: "text-embedding-3-small".into(),
                    base_url: None,
                }),
                rag_llm: Some(LlmConfig {
                    provider: "openai".into(),
                    model: "gpt-4o-mini".into(),
                    base_url: None,
                }),
                api_keys: None,
                token_budget: None,
                top_n: None,
                system_prompt: None,
                search: None,
            }],
        }
    }

    #[test]
    fn minimal_config_is_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn rejects_empty_pipelines() {
        let mut cfg = minimal();
        cfg.pipelines.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut cfg = minimal();
        let dup = cfg.pipelines[0].clone();
        cfg.pipelines.push(dup);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut cfg = minimal();
        cfg.pipelines[0].rag_llm.as_mut().unwrap().provider = "cohere".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_vector_weight() {
        let mut cfg = minimal();
        cfg.pipelines[0].search = Some(SearchConfig {
            hybrid_enabled: Some(true),
            vector_weight: Some(1.5),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_tls_without_cert_material() {
        let mut cfg = minimal();
        cfg.server.tls = Some(TlsConfig {
            enabled: true,
            cert_file: None,
            key_file: None,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn database_defaults() {
        let db = DatabaseConfig {
            host: "localhost".into(),
            database: "corpus".into(),
            ..Default::default()
        };
        assert_eq!(db.port(), 5432);
        assert_eq!(db.ssl_mode(), "prefer");
    }

    #[test]
    fn parses_yaml_document() {
        let yaml = r#"
server:
  listen_address: 127.0.0.1
  port: 9090
defaults:
  token_budget: 2000
  top_n: 10
pipelines:
  - name: docs
    database:
      host: db.internal
      database: corpus
      username: rag
    tables:
      - table: documents
        text_column: content
        vector_column: embedding
        filter: "lang = 'en'"
      - table: kb.articles
        text_column: body
        vector_column: body_embedding
        id_column: article_id
        filter:
          conditions:
            - column: published
              operator: "="
              value: true
          logic: AND
    embedding_llm:
      provider: openai
      model: text-embedding-3-small
    rag_llm:
      provider: anthropic
      model: claude-3-5-haiku-latest
    search:
      hybrid_enabled: true
      vector_weight: 0.7
"#;
        let cfg = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap();
        let app: AppConfig = cfg.try_deserialize().unwrap();
        app.validate().unwrap();

        assert_eq!(app.server.port, 9090);
        assert_eq!(app.defaults.as_ref().unwrap().token_budget, Some(2000));
        let pipeline = &app.pipelines[0];
        assert_eq!(pipeline.tables.len(), 2);
        assert!(matches!(
            pipeline.tables[0].filter,
            Some(ConfigFilter::RawSql(_))
        ));
        assert!(matches!(
            pipeline.tables[1].filter,
            Some(ConfigFilter::Structured(_))
        ));
    }
}
