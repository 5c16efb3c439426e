use lopdf::Document;
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use super::error::KnowledgeError;
use super::state::Reference;
use super::utils::{chunk_text, document_name, CHUNK_SIZE};
use super::vectordb::SqliteVectorDb;

/// PDFs fetched from URLs, chunked and indexed into a vector collection.
pub struct PdfUrlKnowledgeBase {
    urls: Vec<Url>,
    vector_db: SqliteVectorDb,
    num_documents: usize,
    client: Client,
}

impl PdfUrlKnowledgeBase {
    pub fn new(urls: Vec<Url>, vector_db: SqliteVectorDb, num_documents: usize) -> Self {
        Self {
            urls,
            vector_db,
            num_documents,
            client: Client::new(),
        }
    }

    pub fn vector_db(&self) -> &SqliteVectorDb {
        &self.vector_db
    }

    /// Downloads and indexes every document. Chunks already present in the
    /// collection are skipped, so loading again after a restart is cheap.
    /// Returns the number of newly indexed chunks.
    pub async fn load(&self) -> Result<usize, KnowledgeError> {
        let mut inserted = 0;
        for url in &self.urls {
            let name = document_name(url);
            info!(%url, collection = %self.vector_db.collection(), "loading document");

            let bytes = self.download(url).await?;
            let text = read_pdf(&name, &bytes)?;
            inserted += self.load_document(&name, &text)?;
        }
        info!(inserted, total = self.vector_db.count()?, "knowledge base loaded");
        Ok(inserted)
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, KnowledgeError> {
        let to_error = |source| KnowledgeError::Download {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(to_error)?;
        let bytes = response.bytes().await.map_err(to_error)?;
        Ok(bytes.to_vec())
    }

    /// Indexes already extracted text under `name`.
    pub fn load_document(&self, name: &str, text: &str) -> Result<usize, KnowledgeError> {
        let chunks = chunk_text(text, CHUNK_SIZE);
        if chunks.is_empty() {
            return Err(KnowledgeError::EmptyDocument(name.to_string()));
        }
        Ok(self.vector_db.insert(name, &chunks)?)
    }

    pub fn search(&self, query: &str) -> Result<Vec<Reference>, KnowledgeError> {
        Ok(self.vector_db.search(query, self.num_documents)?)
    }
}

/// Extracts the text of every page. Pages that fail to decode are skipped.
pub fn read_pdf(name: &str, bytes: &[u8]) -> Result<String, KnowledgeError> {
    let document = Document::load_mem(bytes).map_err(|source| KnowledgeError::Pdf {
        name: name.to_string(),
        source,
    })?;

    let mut text = String::new();
    for page_number in document.get_pages().keys() {
        match document.extract_text(&[*page_number]) {
            Ok(page) => {
                text.push_str(&page);
                text.push('\n');
            }
            Err(e) => warn!(name, page = page_number, "skipping unreadable page: {e}"),
        }
    }
    Ok(text)
}
