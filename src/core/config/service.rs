use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::Settings;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "access_key",
    "access_token",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 2] = ["max_tokens", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("DOCQA_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Public config with secrets layered on top.
    pub fn load_config(&self) -> Result<Value, ApiError> {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        let merged = deep_merge(&public_config, &secrets_config);
        validate_config(&merged)?;
        Ok(merged)
    }

    /// Loads, validates and applies environment overrides.
    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        let merged = self.load_config()?;
        let mut settings = settings_from_value(merged)?;
        settings.apply_env_overrides(|name| env::var(name).ok());
        Ok(settings)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

pub fn settings_from_value(value: Value) -> Result<Settings, ApiError> {
    serde_json::from_value(value)
        .map_err(|err| ApiError::BadRequest(format!("Invalid config: {}", err)))
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(Value::Null) => Value::Object(Map::new()),
            Ok(_) => {
                tracing::warn!("Ignoring {}: top level is not a mapping", path.display());
                Value::Object(Map::new())
            }
            Err(err) => {
                tracing::warn!("Ignoring {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(err) => {
            tracing::warn!("Failed to read {}: {}", path.display(), err);
            Value::Object(Map::new())
        }
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_in(dir: &Path) -> ConfigService {
        ConfigService::new(Arc::new(AppPaths::from_root(dir)))
    }

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "openai": { "chat_model": "gpt-3.5-turbo", "request_timeout_secs": 60 },
            "rag": { "top_k": 4 }
        });
        let secrets = json!({
            "openai": { "api_key": "sk-test" },
            "rag": { "top_k": 6 }
        });

        let merged = deep_merge(&base, &secrets);

        assert_eq!(
            merged,
            json!({
                "openai": {
                    "chat_model": "gpt-3.5-turbo",
                    "request_timeout_secs": 60,
                    "api_key": "sk-test"
                },
                "rag": { "top_k": 6 }
            })
        );
    }

    #[test]
    fn redact_sensitive_values_replaces_secrets_only() {
        let input = json!({
            "openai": {
                "api_key": "sk-secret",
                "chat_model": "gpt-3.5-turbo"
            },
            "rag": { "max_tokens": 42 }
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(
            redacted,
            json!({
                "openai": {
                    "api_key": "****",
                    "chat_model": "gpt-3.5-turbo"
                },
                "rag": { "max_tokens": 42 }
            })
        );
    }

    #[test]
    fn load_config_merges_public_and_secret_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("config.yml"),
            "rag:\n  chunk_size: 300\nopenai:\n  chat_model: gpt-4o-mini\n",
        )
        .unwrap();
        fs::write(tmp.path().join("secrets.yaml"), "openai:\n  api_key: sk-file\n").unwrap();

        let service = service_in(tmp.path());
        let settings = settings_from_value(service.load_config().unwrap()).unwrap();

        assert_eq!(settings.rag.chunk_size, 300);
        assert_eq!(settings.openai.chat_model, "gpt-4o-mini");
        assert_eq!(settings.openai.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn missing_files_yield_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_in(tmp.path());

        let settings = settings_from_value(service.load_config().unwrap()).unwrap();
        assert_eq!(settings.rag.chunk_size, 500);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("config.yml"),
            "rag:\n  chunk_size: 100\n  chunk_overlap: 100\n",
        )
        .unwrap();

        let service = service_in(tmp.path());
        assert!(matches!(
            service.load_config(),
            Err(ApiError::BadRequest(_))
        ));
    }
}
