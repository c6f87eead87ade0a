use rmcp::ErrorData as McpError;
use serde_json::Value;
use url::Url;

/// Accepts `http(s)` URLs and absolute paths under the public asset directory.
pub fn validate_media_url(raw: &str) -> Result<String, McpError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(McpError::invalid_params("media url must not be empty", None));
    }
    if trimmed.starts_with('/') && !trimmed.starts_with("//") {
        if trimmed.split('/').any(|segment| segment == "..") {
            return Err(McpError::invalid_params(
                "media path must not leave the public directory",
                Some(Value::String(trimmed.to_string())),
            ));
        }
        return Ok(trimmed.to_string());
    }
    let parsed = Url::parse(trimmed).map_err(|err| {
        McpError::invalid_params("invalid media url", Some(Value::String(err.to_string())))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        scheme => Err(McpError::invalid_params(
            "only http and https media urls are allowed",
            Some(Value::String(format!("scheme: {scheme}"))),
        )),
    }
}
