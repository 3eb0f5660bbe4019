pub mod config;
pub mod copilot;
pub mod llm;
pub mod prompt;
pub mod relay;
