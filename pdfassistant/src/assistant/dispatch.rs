//! Sending user text to whatever interaction method an assistant offers.
//!
//! Assistants advertise a set of [`Capability`] values. [`dispatch`] tries
//! them in [`Capability::PREFERENCE_ORDER`] and invokes exactly one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::error::AssistantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Run,
    Respond,
    Ask,
}

impl Capability {
    pub const PREFERENCE_ORDER: [Capability; 3] = [Capability::Run, Capability::Respond, Capability::Ask];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Run => "run",
            Capability::Respond => "respond",
            Capability::Ask => "ask",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait Conversational: Send {
    fn capabilities(&self) -> &[Capability];

    async fn invoke(&mut self, capability: Capability, message: &str)
        -> Result<String, AssistantError>;

    /// Identifier of the conversation this assistant is in, if it has one.
    fn run_id(&self) -> Result<Option<String>, AssistantError>;
}

/// First capability in preference order that `supported` contains.
pub fn first_supported(supported: &[Capability]) -> Option<Capability> {
    Capability::PREFERENCE_ORDER
        .into_iter()
        .find(|capability| supported.contains(capability))
}

pub async fn dispatch(
    assistant: &mut dyn Conversational,
    message: &str,
) -> Result<String, AssistantError> {
    let capability = first_supported(assistant.capabilities()).ok_or(AssistantError::NoUsableMethod)?;
    debug!(%capability, "dispatching message");
    assistant.invoke(capability, message).await
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted assistant that records every call it receives.
    pub struct FakeAssistant {
        pub supported: Vec<Capability>,
        pub reply: Result<String, String>,
        pub run_id_after: Result<Option<String>, String>,
        pub calls: Arc<Mutex<Vec<(Capability, String)>>>,
    }

    impl FakeAssistant {
        pub fn replying(reply: &str) -> Self {
            Self {
                supported: Capability::PREFERENCE_ORDER.to_vec(),
                reply: Ok(reply.to_string()),
                run_id_after: Ok(None),
                calls: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Conversational for FakeAssistant {
        fn capabilities(&self) -> &[Capability] {
            &self.supported
        }

        async fn invoke(
            &mut self,
            capability: Capability,
            message: &str,
        ) -> Result<String, AssistantError> {
            self.calls.lock().unwrap().push((capability, message.to_string()));
            self.reply.clone().map_err(AssistantError::Model)
        }

        fn run_id(&self) -> Result<Option<String>, AssistantError> {
            self.run_id_after.clone().map_err(AssistantError::Model)
        }
    }
}
