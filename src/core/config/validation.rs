use serde_json::{Map, Value};

use crate::core::errors::RagError;

pub fn validate_config(config: &Value) -> Result<(), RagError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65535)?;
        validate_string_array_field(server, "server.cors_allowed_origins", "cors_allowed_origins")?;
    }

    if let Some(chunking) = expect_optional_object(root, "chunking")? {
        validate_u64_field(chunking, "chunking.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(chunking, "chunking.overlap", "overlap", 0, 1_000_000)?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_optional_string_field(embedding, "embedding.provider", "provider")?;
        validate_optional_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_optional_string_field(embedding, "embedding.api_key", "api_key")?;
        validate_u64_field(embedding, "embedding.dimension", "dimension", 1, 65_536)?;
        validate_u64_field(embedding, "embedding.batch_size", "batch_size", 1, 4_096)?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 3_600)?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 1_000)?;
        validate_u64_field(retrieval, "retrieval.max_chars", "max_chars", 1, 10_000_000)?;
        validate_bool_field(retrieval, "retrieval.lexical_enabled", "lexical_enabled")?;
        validate_f64_field(
            retrieval,
            "retrieval.similarity_weight",
            "similarity_weight",
            0.0,
            1.0,
        )?;
        validate_u64_field(retrieval, "retrieval.timeout_ms", "timeout_ms", 1, 600_000)?;
    }

    if let Some(processing) = expect_optional_object(root, "processing")? {
        validate_u64_field(processing, "processing.workers", "workers", 1, 256)?;
        validate_u64_field(processing, "processing.max_attempts", "max_attempts", 1, 20)?;
        validate_u64_field(
            processing,
            "processing.backoff_base_ms",
            "backoff_base_ms",
            0,
            600_000,
        )?;
        validate_u64_field(
            processing,
            "processing.backoff_max_ms",
            "backoff_max_ms",
            0,
            3_600_000,
        )?;
        validate_u64_field(
            processing,
            "processing.stale_after_secs",
            "stale_after_secs",
            1,
            604_800,
        )?;
        validate_u64_field(
            processing,
            "processing.sweep_interval_secs",
            "sweep_interval_secs",
            1,
            86_400,
        )?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_bool_field(generation, "generation.enabled", "enabled")?;
        validate_optional_string_field(generation, "generation.base_url", "base_url")?;
        validate_optional_string_field(generation, "generation.model", "model")?;
        validate_optional_string_field(generation, "generation.api_key", "api_key")?;
        validate_u64_field(generation, "generation.timeout_secs", "timeout_secs", 1, 3_600)?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, RagError> {
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
) -> Result<(), RagError> {
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
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(RagError::Configuration(format!(
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
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !(min..=max).contains(&number) {
        return Err(RagError::Configuration(format!(
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
) -> Result<(), RagError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "string")),
    }
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
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
            return Err(RagError::Configuration(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> RagError {
    RagError::Configuration(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_empty_and_partial_configs() {
        validate_config(&json!({})).unwrap();
        validate_config(&json!({
            "chunking": { "chunk_size": 800 },
            "retrieval": { "similarity_weight": 0.5, "lexical_enabled": false }
        }))
        .unwrap();
    }

    #[test]
    fn rejects_out_of_range_and_mistyped_fields() {
        let err = validate_config(&json!({ "retrieval": { "similarity_weight": 1.5 } }))
            .unwrap_err();
        assert!(err.to_string().contains("retrieval.similarity_weight"));

        let err = validate_config(&json!({ "embedding": { "dimension": "768" } })).unwrap_err();
        assert!(err.to_string().contains("expected integer"));

        let err = validate_config(&json!({ "processing": [] })).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
