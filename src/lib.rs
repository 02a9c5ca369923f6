pub mod archive;
pub mod config;
pub mod export;
pub mod llm;
pub mod prompt;
pub mod session;
