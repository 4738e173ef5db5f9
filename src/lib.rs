pub mod api;
pub mod app;
pub mod auth;
pub mod chats;
pub mod constants;
pub mod db;
pub mod hardening;
pub mod health;
pub mod keys;
pub mod logging;
pub mod messages;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod reader;
pub mod registry;
pub mod str_utils;
pub mod streams;
pub mod types;

pub use types::*;

pub use app::{AppState, Args};
