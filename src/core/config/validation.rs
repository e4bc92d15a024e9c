use serde_json::{Map, Value};
use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
        validate_u64_field(
            server,
            "server.max_upload_bytes",
            "max_upload_bytes",
            1,
            1024 * 1024 * 1024,
        )?;
    }

    if let Some(storage) = expect_optional_object(root, "storage")? {
        validate_optional_string_field(storage, "storage.uploads_dir", "uploads_dir")?;
    }

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(rag, "rag.chunk_overlap", "chunk_overlap", 0, 1_000_000)?;
        validate_u64_field(rag, "rag.top_k", "top_k", 1, 1_000)?;
        validate_bool_field(rag, "rag.cache_index", "cache_index")?;
        validate_u64_field(
            rag,
            "rag.embedding_batch_size",
            "embedding_batch_size",
            1,
            2_048,
        )?;
        validate_u64_field(
            rag,
            "rag.embedding_concurrency",
            "embedding_concurrency",
            1,
            64,
        )?;
        validate_overlap_below_chunk_size(rag)?;
    }

    if let Some(openai) = expect_optional_object(root, "openai")? {
        validate_optional_string_field(openai, "openai.base_url", "base_url")?;
        validate_optional_string_field(openai, "openai.api_key", "api_key")?;
        validate_optional_string_field(openai, "openai.embedding_model", "embedding_model")?;
        validate_optional_string_field(openai, "openai.chat_model", "chat_model")?;
        validate_f64_field(openai, "openai.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(
            openai,
            "openai.request_timeout_secs",
            "request_timeout_secs",
            1,
            3_600,
        )?;
        validate_u64_field(
            openai,
            "openai.retry_backoff_ms",
            "retry_backoff_ms",
            0,
            60_000,
        )?;
    }

    if let Some(extraction) = expect_optional_object(root, "extraction")? {
        validate_optional_string_field(
            extraction,
            "extraction.pdftotext_path",
            "pdftotext_path",
        )?;
    }

    if let Some(logging) = expect_optional_object(root, "logging")? {
        validate_optional_string_field(logging, "logging.level", "level")?;
    }

    Ok(())
}

fn validate_overlap_below_chunk_size(rag: &Map<String, Value>) -> Result<(), ApiError> {
    let chunk_size = rag
        .get("chunk_size")
        .and_then(Value::as_u64)
        .unwrap_or(crate::core::config::settings::DEFAULT_CHUNK_SIZE as u64);
    let overlap = rag.get("chunk_overlap").and_then(Value::as_u64).unwrap_or(0);
    if overlap >= chunk_size {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at 'rag.chunk_overlap': must be less than chunk_size ({})",
            chunk_size
        )));
    }
    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
