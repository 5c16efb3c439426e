//! Process-wide handles built at most once.
//!
//! The knowledge base and the conversation storage are expensive to set up
//! (the knowledge base downloads and indexes its documents), so [`Resources`]
//! builds each of them on first use and hands out the same `Arc` afterwards.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use super::agent::{Assistant, AssistantOptions};
use super::configuration::Configuration;
use super::dispatch::Conversational;
use super::error::{AssistantError, KnowledgeError, StorageError};
use super::groq::{ChatModel, GroqClient};
use super::knowledge::PdfUrlKnowledgeBase;
use super::storage::SqliteAssistantStorage;
use super::vectordb::SqliteVectorDb;

/// A value constructed by the first successful initializer.
///
/// Concurrent callers wait for the running initializer. A failed initializer
/// leaves the cell empty, so the next caller tries again.
#[derive(Debug)]
pub struct Memoized<T> {
    cell: OnceCell<T>,
}

impl<T> Default for Memoized<T> {
    fn default() -> Self {
        Self { cell: OnceCell::new() }
    }
}

impl<T: Clone> Memoized<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_init<E, F, Fut>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cell.get_or_try_init(init).await.cloned()
    }

    pub fn get(&self) -> Option<T> {
        self.cell.get().cloned()
    }
}

/// Builds assistants for the UI loop.
#[async_trait]
pub trait AssistantFactory: Send + Sync {
    async fn assistant(
        &self,
        run_id: Option<String>,
        user_id: &str,
    ) -> anyhow::Result<Box<dyn Conversational>>;
}

pub struct Resources {
    config: Configuration,
    model: Arc<dyn ChatModel>,
    options: AssistantOptions,
    knowledge_base: Memoized<Arc<PdfUrlKnowledgeBase>>,
    storage: Memoized<Arc<SqliteAssistantStorage>>,
}

impl Resources {
    pub fn new(config: Configuration) -> Self {
        let model = Arc::new(GroqClient::new(
            config.groq_api_key.clone(),
            config.groq_model.clone(),
        ));
        Self::with_model(config, model)
    }

    pub fn with_model(config: Configuration, model: Arc<dyn ChatModel>) -> Self {
        Self {
            config,
            model,
            options: AssistantOptions::default(),
            knowledge_base: Memoized::new(),
            storage: Memoized::new(),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The indexed knowledge base. The first call downloads and indexes the
    /// configured documents; load errors are returned to the caller.
    pub async fn knowledge_base(&self) -> Result<Arc<PdfUrlKnowledgeBase>, KnowledgeError> {
        self.knowledge_base
            .get_or_try_init(move || async move {
                let vector_db =
                    SqliteVectorDb::open(self.config.database_path(), &self.config.collection)?;
                let knowledge_base = PdfUrlKnowledgeBase::new(
                    self.config.document_urls.clone(),
                    vector_db,
                    self.config.num_documents,
                );
                knowledge_base.load().await?;
                info!(collection = %self.config.collection, "knowledge base ready");
                Ok::<_, KnowledgeError>(Arc::new(knowledge_base))
            })
            .await
    }

    pub async fn storage(&self) -> Result<Arc<SqliteAssistantStorage>, StorageError> {
        self.storage
            .get_or_try_init(move || async move {
                let storage = SqliteAssistantStorage::open(
                    self.config.database_path(),
                    &self.config.table_name,
                )?;
                info!(table = %storage.table_name(), "assistant storage ready");
                Ok::<_, StorageError>(Arc::new(storage))
            })
            .await
    }

    pub async fn build_assistant(
        &self,
        run_id: Option<String>,
        user_id: &str,
    ) -> Result<Assistant, AssistantError> {
        let knowledge_base = self.knowledge_base().await?;
        let storage = self.storage().await?;
        Assistant::new(
            run_id,
            user_id,
            knowledge_base,
            storage,
            Arc::clone(&self.model),
            self.options,
        )
    }
}

#[async_trait]
impl AssistantFactory for Resources {
    async fn assistant(
        &self,
        run_id: Option<String>,
        user_id: &str,
    ) -> anyhow::Result<Box<dyn Conversational>> {
        Ok(Box::new(self.build_assistant(run_id, user_id).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::agent::testing::StubModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resources(dir: &tempfile::TempDir) -> Resources {
        let config = Configuration {
            db_url: format!("sqlite://{}", dir.path().join("ai.db").display()),
            document_urls: Vec::new(),
            ..Configuration::default()
        };
        Resources::with_model(config, Arc::new(StubModel::replying("ok")))
    }

    #[tokio::test]
    async fn initializer_runs_once() {
        let memo: Memoized<Arc<String>> = Memoized::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let init = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::convert::Infallible>(Arc::new("kb".to_string()))
        };
        let (a, b) = tokio::join!(memo.get_or_try_init(init), memo.get_or_try_init(init));
        let c = memo.get_or_try_init(init).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert!(Arc::ptr_eq(&c, &memo.get().unwrap()));
    }

    #[tokio::test]
    async fn failed_initialization_is_retried() {
        let memo: Memoized<u32> = Memoized::new();
        let first = memo.get_or_try_init(|| async { Err::<u32, _>("load failed") }).await;
        assert_eq!(first, Err("load failed"));
        assert!(memo.get().is_none());

        let second = memo.get_or_try_init(|| async { Ok::<_, &str>(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn handles_are_shared() {
        let dir = tempfile::tempdir().unwrap();
        let resources = resources(&dir);

        let kb1 = resources.knowledge_base().await.unwrap();
        let kb2 = resources.knowledge_base().await.unwrap();
        assert!(Arc::ptr_eq(&kb1, &kb2));

        let s1 = resources.storage().await.unwrap();
        let s2 = resources.storage().await.unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[tokio::test]
    async fn builds_fresh_assistants() {
        let dir = tempfile::tempdir().unwrap();
        let resources = resources(&dir);

        let assistant = resources.assistant(None, "user").await.unwrap();
        assert_eq!(assistant.run_id().unwrap(), None);

        let resumed = resources.assistant(Some("run-9".into()), "user").await.unwrap();
        assert_eq!(resumed.run_id().unwrap().as_deref(), Some("run-9"));
    }

    #[tokio::test]
    async fn invalid_table_name_fails_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut resources = resources(&dir);
        resources.config.table_name = "bad name".to_string();
        assert!(resources.storage().await.is_err());
        assert!(resources.assistant(None, "user").await.is_err());
    }
}
