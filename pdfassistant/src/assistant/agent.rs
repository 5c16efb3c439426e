use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::dispatch::{Capability, Conversational};
use super::error::AssistantError;
use super::groq::ChatModel;
use super::knowledge::PdfUrlKnowledgeBase;
use super::prompts::{format_system_prompt, format_tool_call};
use super::state::{AssistantRun, ChatMessage};
use super::storage::SqliteAssistantStorage;
use super::utils::format_references;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantOptions {
    /// Prefix replies with the knowledge search that was run.
    pub show_tool_calls: bool,
    pub search_knowledge: bool,
    /// Send earlier messages of the run along with the new one.
    pub read_chat_history: bool,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            show_tool_calls: true,
            search_knowledge: true,
            read_chat_history: true,
        }
    }
}

/// A conversation over the knowledge base, persisted after every exchange.
pub struct Assistant {
    run_id: Option<String>,
    user_id: String,
    run: Option<AssistantRun>,
    knowledge_base: Arc<PdfUrlKnowledgeBase>,
    storage: Arc<SqliteAssistantStorage>,
    model: Arc<dyn ChatModel>,
    options: AssistantOptions,
}

impl Assistant {
    /// Resumes the stored run named by `run_id` when there is one. An unknown
    /// id starts an empty conversation under that id; `None` gets a fresh id on
    /// the first successful exchange.
    pub fn new(
        run_id: Option<String>,
        user_id: impl Into<String>,
        knowledge_base: Arc<PdfUrlKnowledgeBase>,
        storage: Arc<SqliteAssistantStorage>,
        model: Arc<dyn ChatModel>,
        options: AssistantOptions,
    ) -> Result<Self, AssistantError> {
        let run = match &run_id {
            Some(id) => storage.read(id)?,
            None => None,
        };
        if let Some(run) = &run {
            debug!(run_id = %run.run_id, messages = run.messages.len(), "resuming run");
        }

        Ok(Self {
            run_id,
            user_id: user_id.into(),
            run,
            knowledge_base,
            storage,
            model,
            options,
        })
    }

    #[cfg(test)]
    fn history(&self) -> &[ChatMessage] {
        self.run.as_ref().map(|run| run.messages.as_slice()).unwrap_or_default()
    }

    pub async fn run(&mut self, message: &str) -> Result<String, AssistantError> {
        let run_id = self
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut run = self
            .run
            .clone()
            .unwrap_or_else(|| AssistantRun::new(run_id.clone(), self.user_id.clone()));

        let references = if self.options.search_knowledge {
            let references = self.knowledge_base.search(message)?;
            debug!(found = references.len(), "searched knowledge base");
            Some(format_references(&references))
        } else {
            None
        };

        let mut messages = vec![ChatMessage::system(format_system_prompt(references.as_deref()))];
        if self.options.read_chat_history {
            messages.extend(run.messages.iter().cloned());
        }
        messages.push(ChatMessage::user(message));

        let reply = self.model.complete(&messages).await?;

        run.messages.push(ChatMessage::user(message));
        run.messages.push(ChatMessage::assistant(reply.clone()));
        let stored = self.storage.upsert(&run)?;
        info!(run_id = %stored.run_id, user_id = %stored.user_id, "exchange completed");

        self.run = Some(stored);
        self.run_id = Some(run_id);

        if self.options.show_tool_calls && self.options.search_knowledge {
            Ok(format!(" - {}\n\n{}", format_tool_call(message), reply))
        } else {
            Ok(reply)
        }
    }
}

#[async_trait]
impl Conversational for Assistant {
    fn capabilities(&self) -> &[Capability] {
        &[Capability::Run]
    }

    async fn invoke(
        &mut self,
        capability: Capability,
        message: &str,
    ) -> Result<String, AssistantError> {
        match capability {
            Capability::Run => self.run(message).await,
            other => Err(AssistantError::Unsupported(other.name())),
        }
    }

    fn run_id(&self) -> Result<Option<String>, AssistantError> {
        Ok(self.run_id.clone())
    }
}
