pub mod config;
pub mod embedding;
pub mod llm;
pub mod retry;
