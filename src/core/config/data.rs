use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::GenerationParams;
use crate::core::backend::BackendKind;
use crate::core::config::defaults::{
    DEFAULT_EDIT_INTERVAL_MS, DEFAULT_ENDPOINT, DEFAULT_LOG_FILTER, DEFAULT_TEMPLATE,
};
use crate::core::pipeline::PipelineSettings;
use crate::core::templates::{Template, TemplateSet};

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub model: Option<String>,
    /// Name of the environment variable holding the API key, e.g. `OPENAI_API_KEY`
    pub api_key_env: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            endpoint: default_endpoint(),
            model: None,
            api_key_env: None,
        }
    }
}

impl BackendConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Name of the active prompt template (e.g., "vicuna-v1.1", "chatml")
    pub template: Option<String>,
    /// Minimum time between two edits of a streamed reply
    pub edit_interval_ms: Option<u64>,
    /// Mention removed from incoming messages (e.g., "@relay_bot")
    pub bot_username: Option<String>,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: Option<String>,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Passed through to the backend with every request
    #[serde(default)]
    pub generation: GenerationParams,
    /// Custom templates; a custom template replaces a built-in one with the same name
    #[serde(default)]
    pub templates: Vec<Template>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn active_template(&self) -> &str {
        self.template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }

    pub fn edit_interval(&self) -> Duration {
        Duration::from_millis(self.edit_interval_ms.unwrap_or(DEFAULT_EDIT_INTERVAL_MS))
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Built-in templates with the configured ones layered on top.
    pub fn template_set(&self) -> TemplateSet {
        let mut templates = TemplateSet::builtin();
        templates.merge(self.templates.iter().cloned());
        templates
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            edit_interval: self.edit_interval(),
            bot_username: self
                .bot_username
                .clone()
                .filter(|name| !name.trim().is_empty()),
            generation: self.generation.clone(),
        }
    }
}
