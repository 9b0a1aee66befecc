pub mod cache;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod database;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod parsers;
pub mod prompts;
pub mod registry;
pub mod schema;
pub mod selector;
pub mod sql_guard;
pub mod table_info;
pub mod type_inference;
pub mod viz;

pub use config::Settings;
pub use engine::QueryEngine;
pub use error::EngineError;
