//! API credential resolution
//!
//! Keys are resolved once per pipeline at construction time, only for
//! the providers that pipeline actually uses. Resolution order:
//! configured file path, then the provider's environment variable, then
//! a dotfile in the home directory. File contents are trimmed; an empty
//! key is rejected.

use crate::errors::{AppError, Result};
use crate::providers::Provider;
use std::path::PathBuf;

/// Per-pipeline resolved credentials
///
/// Absence means the provider is unavailable for that pipeline.
#[derive(Debug, Clone, Default)]
pub struct LoadedKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub voyage: Option<String>,
}

impl LoadedKeys {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
            Provider::Voyage => self.voyage.as_deref(),
            Provider::Ollama => None,
        }
    }

    pub fn set(&mut self, provider: Provider, key: String) {
        match provider {
            Provider::OpenAi => self.openai = Some(key),
            Provider::Anthropic => self.anthropic = Some(key),
            Provider::Voyage => self.voyage = Some(key),
            Provider::Ollama => {}
        }
    }
}

/// Resolve the key for one provider
///
/// `configured_path` is the already-cascaded file path from the config
/// (pipeline > defaults > global).
pub fn load_provider_key(provider: Provider, configured_path: Option<&str>) -> Result<String> {
    if provider == Provider::Ollama {
        return Err(AppError::Credential {
            message: "ollama does not use API keys".into(),
        });
    }

    if let Some(path) = configured_path {
        return read_key_file(provider, &expand_home(path));
    }

    if let Some(var) = provider.env_var() {
        if let Ok(value) = std::env::var(var) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }

    if let Some(dotfile) = provider.dotfile() {
        let path = home_dir()?.join(dotfile);
        if path.is_file() {
            return read_key_file(provider, &path);
        }
    }

    Err(AppError::Credential {
        message: format!(
            "no API key for {}: set {}, configure api_keys.{}, or create ~/{}",
            provider.as_str(),
            provider.env_var().unwrap_or("-"),
            provider.as_str(),
            provider.dotfile().unwrap_or("-"),
        ),
    })
}

fn read_key_file(provider: Provider, path: &PathBuf) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| AppError::Credential {
        message: format!(
            "failed to read {} key file {}: {}",
            provider.as_str(),
            path.display(),
            e
        ),
    })?;
    let key = raw.trim().to_string();
    if key.is_empty() {
        return Err(AppError::Credential {
            message: format!(
                "{} key file {} is empty",
                provider.as_str(),
                path.display()
            ),
        });
    }
    Ok(key)
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Result<PathBuf> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| AppError::Credential {
            message: "HOME is not set".into(),
        })
}
