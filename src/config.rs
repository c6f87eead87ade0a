use std::env;
use std::path::PathBuf;

use crate::error::{RemixError, Result};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GCP_LOCATION: &str = "us-central1";

/// Process configuration, read from the environment after `.env` is loaded.
#[derive(Clone, Debug)]
pub struct RemixConfig {
    pub port: u16,
    pub secret_key: Option<String>,
    pub cache_dir: PathBuf,
    pub cache_base_url: String,
    /// Directory holding the built-in demo media, served at the site root.
    pub public_dir: PathBuf,
    pub gemini_api_key: Option<String>,
    pub gcp_project_id: Option<String>,
    pub gcp_access_token: Option<String>,
    pub gcp_location: String,
}

impl RemixConfig {
    pub fn from_env() -> Self {
        let port = env::var("MCP_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let bind_address = format!("0.0.0.0:{port}");
        Self {
            port,
            secret_key: non_empty_var("SECRET_KEY"),
            cache_dir: resolve_cache_dir(),
            cache_base_url: resolve_cache_base_url(&bind_address),
            public_dir: non_empty_var("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gcp_project_id: non_empty_var("GCP_PROJECT_ID"),
            gcp_access_token: non_empty_var("GCP_ACCESS_TOKEN"),
            gcp_location: non_empty_var("GCP_LOCATION")
                .unwrap_or_else(|| DEFAULT_GCP_LOCATION.to_string()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Route path, prefixed with the secret key when one is configured.
    pub fn secret_path(&self, path: &str) -> String {
        match self.secret_key.as_deref() {
            Some(value) => format!("/{value}{path}"),
            None => path.to_string(),
        }
    }

    pub fn require_gemini_key(&self) -> Result<&str> {
        self.gemini_api_key
            .as_deref()
            .ok_or_else(|| RemixError::Config("missing GEMINI_API_KEY".to_string()))
    }

    pub fn require_gcp(&self) -> Result<(&str, &str)> {
        match (self.gcp_project_id.as_deref(), self.gcp_access_token.as_deref()) {
            (Some(project), Some(token)) => Ok((project, token)),
            _ => Err(RemixError::Config(
                "GCP_PROJECT_ID and GCP_ACCESS_TOKEN are required for video generation".to_string(),
            )),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_cache_dir() -> PathBuf {
    if let Some(dir) = non_empty_var("CACHE_DIR") {
        return PathBuf::from(dir);
    }
    let mut base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("konten-remix");
    base
}

fn resolve_cache_base_url(bind_address: &str) -> String {
    if let Some(cache_url) = non_empty_var("CACHE_URL") {
        return format!("{}/cache", cache_url.trim_end_matches('/'));
    }
    let raw_domain = non_empty_var("DOMAIN").unwrap_or_else(|| bind_address.to_string());
    format!("{}/cache", normalize_base_url(&raw_domain))
}

/// Adds a scheme when missing and collapses doubled schemes such as `http://https://`.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let mut rest = trimmed;
    let mut scheme = "http://";
    loop {
        if let Some(stripped) = rest.strip_prefix("https://") {
            scheme = "https://";
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("http://") {
            scheme = "http://";
            rest = stripped;
        } else {
            break;
        }
    }
    format!("{scheme}{rest}")
}
