pub mod agent;
pub mod configuration;
pub mod dispatch;
pub mod error;
pub mod groq;
pub mod knowledge;
pub mod markdown;
pub mod prompts;
pub mod resources;
pub mod session;
pub mod state;
pub mod storage;
pub mod utils;
pub mod vectordb;
