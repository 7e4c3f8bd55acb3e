//! Environment-backed application configuration
//!
//! Each section has a `Default` impl that reads its environment variables,
//! so `AppConfig::default()` is the complete runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded video files
    pub upload_dir: PathBuf,
    /// Directory holding per-task artifact directories and the task index
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./outputs")),
        }
    }
}

impl StorageConfig {
    /// Path of the persisted task index
    #[must_use]
    pub fn task_index_path(&self) -> PathBuf {
        self.output_dir.join("tasks.json")
    }
}

/// Speech recognition / forced alignment backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the inference service
    pub endpoint: String,
    /// Recognition language hint
    pub language: String,
    /// Whether to derive extra hotwords from the video file name
    pub hotwords_from_filename: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("INFERENCE_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            language: std::env::var("ASR_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
            hotwords_from_filename: std::env::var("HOTWORDS_FROM_FILENAME")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        }
    }
}

/// LLM API configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: std::env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        }
    }
}

/// Orchestrator scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Size of the worker pool executing stage work across tasks
    pub max_concurrent_tasks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: std::env::var("MAX_CONCURRENT_TASKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Server bind address
    #[must_use]
    pub fn bind_addr() -> String {
        std::env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default_dirs() {
        let config = StorageConfig::default();
        assert!(config.task_index_path().ends_with("tasks.json"));
    }

    #[test]
    fn test_pipeline_config_default_pool() {
        let config = PipelineConfig::default();
        assert!(config.max_concurrent_tasks >= 1);
    }
}
