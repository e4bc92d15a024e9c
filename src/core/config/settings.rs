use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

const API_KEY_ENV_VARS: [&str; 2] = ["OPENAI_API_KEY", "REACT_APP_OPENAI_API_KEY"];

/// Typed view over the merged `config.yml` + `secrets.yaml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub rag: RagSettings,
    pub openai: OpenAiSettings,
    pub extraction: ExtractionSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Empty means any origin.
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            cors_allowed_origins: Vec::new(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub uploads_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    /// Maximum segment length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive segments.
    pub chunk_overlap: usize,
    /// Number of segments handed to the model as context.
    pub top_k: usize,
    /// Reuse the built index while the current document is unchanged.
    pub cache_index: bool,
    pub embedding_batch_size: usize,
    pub embedding_concurrency: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: 0,
            top_k: DEFAULT_TOP_K,
            cache_index: true,
            embedding_batch_size: 512,
            embedding_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: Option<f64>,
    pub request_timeout_secs: u64,
    pub retry_backoff_ms: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: None,
            request_timeout_secs: 60,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub pdftotext_path: String,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            pdftotext_path: "pdftotext".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Applies `PORT`, `OPENAI_API_KEY` (or the legacy
    /// `REACT_APP_OPENAI_API_KEY`) and `OPENAI_BASE_URL`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|val| val.trim().parse::<u16>().ok()) {
            self.server.port = port;
        }

        let env_key = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty());
        if let Some(key) = env_key {
            self.openai.api_key = Some(key);
        }

        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|url| !url.trim().is_empty()) {
            self.openai.base_url = url.trim().to_string();
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.openai
            .api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}
