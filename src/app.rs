use crate::db::DbPool;
use crate::streams::StreamStore;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "rockpool.db")]
    pub database: String,
    /// Default long-poll wait for stream reads when the client omits wait_ms.
    #[arg(long, default_value_t = 10)]
    pub stream_wait_secs: u64,
    /// Ceiling for one generation, from provider connect to final token.
    #[arg(long, default_value_t = 240)]
    pub generation_timeout_secs: u64,
    #[arg(long, default_value_t = 300)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    pub max_body_size: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub db: DbPool,
    pub streams: Arc<StreamStore>,
    pub encryption_secret: String,
    pub args: Arc<Args>,
}
