pub mod check_in;
pub mod config;
pub mod conversation;
pub mod database;
pub mod errors;
pub mod http_client;
pub mod llm_client;
pub mod merge;
pub mod model;
pub mod parser;
pub mod runtime;
pub mod scheduler;
pub mod server;
