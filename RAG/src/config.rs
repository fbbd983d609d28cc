use anyhow::{Context, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Runtime settings, read from the environment (and `.env` via dotenv).
#[derive(Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub pinecone_api_key: String,
    pub pinecone_host: String,
    pub pinecone_index: String,
    pub pinecone_namespace: Option<String>,
    pub extraction_model: String,
    pub embedding_model: String,
    pub rerank_model: String,
    pub chat_model: String,
    pub dataset_path: PathBuf,
    pub top_k: usize,
    pub max_candidates: usize,
    pub bind_addr: String,
    pub public_dir: PathBuf,
    pub api_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key))
        };
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: or_default("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            pinecone_api_key: required("PINECONE_API_KEY")?,
            pinecone_host: normalize_host(&required("PINECONE_HOST")?),
            pinecone_index: or_default("PINECONE_INDEX", "medicines"),
            pinecone_namespace: get("PINECONE_NAMESPACE"),
            extraction_model: or_default("EXTRACTION_MODEL", "gpt-4o"),
            embedding_model: or_default("EMBEDDING_MODEL", "text-embedding-ada-002"),
            rerank_model: or_default("RERANK_MODEL", "gpt-4"),
            chat_model: or_default("CHAT_MODEL", "gpt-4o-mini"),
            dataset_path: PathBuf::from(or_default(
                "DATASET_PATH",
                "docs/medicine_dataset_reduced.csv",
            )),
            top_k: parse_or(get("TOP_K"), "TOP_K", 10)?,
            max_candidates: parse_or(get("MAX_CANDIDATES"), "MAX_CANDIDATES", 5)?,
            bind_addr: or_default("BIND_ADDR", "0.0.0.0:3000"),
            public_dir: PathBuf::from(or_default("PUBLIC_DIR", "public")),
            api_token: get("API_TOKEN"),
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", key, raw)),
        None => Ok(default),
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("pinecone_api_key", &redact(&self.pinecone_api_key))
            .field("pinecone_host", &self.pinecone_host)
            .field("pinecone_index", &self.pinecone_index)
            .field("pinecone_namespace", &self.pinecone_namespace)
            .field("extraction_model", &self.extraction_model)
            .field("embedding_model", &self.embedding_model)
            .field("rerank_model", &self.rerank_model)
            .field("chat_model", &self.chat_model)
            .field("dataset_path", &self.dataset_path)
            .field("top_k", &self.top_k)
            .field("max_candidates", &self.max_candidates)
            .field("bind_addr", &self.bind_addr)
            .field("public_dir", &self.public_dir)
            .field("api_token", &self.api_token.as_deref().map(redact))
            .finish()
    }
}
