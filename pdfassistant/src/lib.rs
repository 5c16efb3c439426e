pub mod assistant;
pub mod server;

pub use assistant::agent::{Assistant, AssistantOptions};
pub use assistant::configuration::Configuration;
pub use assistant::dispatch::{dispatch, Capability, Conversational};
pub use assistant::resources::{AssistantFactory, Resources};
pub use assistant::session::{handle_interaction, Interaction, SessionStates, View};
pub use assistant::state::SessionState;

use dotenv::dotenv;

/// Loads a local `.env` file into the process environment, if there is one.
pub fn init() {
    dotenv().ok();
}
