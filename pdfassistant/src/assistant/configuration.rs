use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

pub const GROQ_API_KEY: &str = "GROQ_API_KEY";

pub const DEFAULT_DOCUMENT_URL: &str =
    "https://phi-public.s3.amazonaws.com/recipes/ThaiRecipes.pdf";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub groq_api_key: Option<String>,
    #[serde(default = "default_groq_model")]
    pub groq_model: String,
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default = "default_document_urls")]
    pub document_urls: Vec<Url>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_num_documents")]
    pub num_documents: usize,
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    /// Browser sessions idle for longer than this are forgotten.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_groq_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_db_url() -> String {
    "sqlite://pdf_assistant.db".to_string()
}

fn default_document_urls() -> Vec<Url> {
    // Parsing a constant; covered by tests.
    Url::parse(DEFAULT_DOCUMENT_URL).into_iter().collect()
}

fn default_collection() -> String {
    "recipes".to_string()
}

fn default_table_name() -> String {
    "pdf_assistant".to_string()
}

fn default_user_id() -> String {
    "pdf_assistant_user".to_string()
}

fn default_num_documents() -> usize {
    2
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_session_ttl_secs() -> u64 {
    60 * 60
}

fn default_max_sessions() -> usize {
    1000
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            groq_api_key: None,
            groq_model: default_groq_model(),
            db_url: default_db_url(),
            document_urls: default_document_urls(),
            collection: default_collection(),
            table_name: default_table_name(),
            user_id: default_user_id(),
            num_documents: default_num_documents(),
            addr: default_addr(),
            session_ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl Configuration {
    /// Reads the configuration from the process environment.
    ///
    /// Call [`crate::init`] first so a local `.env` file is taken into account.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Configuration::default();

        config.groq_api_key = lookup(GROQ_API_KEY).filter(|key| !key.trim().is_empty());

        if let Some(model) = lookup("GROQ_MODEL") {
            config.groq_model = model;
        }
        if let Some(db_url) = lookup("PDF_ASSISTANT_DB_URL") {
            config.db_url = db_url;
        }
        if let Some(urls) = lookup("PDF_ASSISTANT_URLS") {
            config.document_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(|url| Url::parse(url).with_context(|| format!("invalid document url: {url}")))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(collection) = lookup("PDF_ASSISTANT_COLLECTION") {
            config.collection = collection;
        }
        if let Some(table_name) = lookup("PDF_ASSISTANT_TABLE") {
            config.table_name = table_name;
        }
        if let Some(user_id) = lookup("PDF_ASSISTANT_USER") {
            config.user_id = user_id;
        }

        config.num_documents = lookup("PDF_ASSISTANT_NUM_DOCUMENTS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_num_documents);

        config.addr = lookup("PDF_ASSISTANT_ADDR")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_addr);

        config.session_ttl_secs = lookup("PDF_ASSISTANT_SESSION_TTL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_session_ttl_secs);

        config.max_sessions = lookup("PDF_ASSISTANT_MAX_SESSIONS")
            .and_then(|v| v.parse().ok())
            .filter(|max| *max > 0)
            .unwrap_or_else(default_max_sessions);

        Ok(config)
    }

    /// Warning shown to the user when the LLM key is missing. The assistant still
    /// starts; the model call fails later with the provider's error.
    pub fn warning(&self) -> Option<String> {
        match self.groq_api_key {
            Some(_) => None,
            None => Some(format!(
                "{GROQ_API_KEY} not set in environment. Set it in .env or your environment variables."
            )),
        }
    }

    /// Filesystem path of the SQLite database behind `db_url`.
    pub fn database_path(&self) -> PathBuf {
        database_path(&self.db_url)
    }
}

/// Accepts both `sqlite://path` and a bare path.
pub fn database_path(db_url: &str) -> PathBuf {
    let path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);
    PathBuf::from(path)
}
