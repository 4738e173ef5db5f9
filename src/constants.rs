/// Upstream API endpoints
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Model used for the fire-and-forget chat title call (server-side Groq key)
pub const TITLE_MODEL: &str = "llama3-70b-8192";
pub const TITLE_MAX_TOKENS: u32 = 100;

/// Ceiling on the long-poll wait a stream read may request
pub const MAX_STREAM_WAIT_MS: u64 = 30_000;

/// Chat listing page cap
pub const CHAT_LIST_LIMIT: i64 = 100;

/// Anthropic requires an explicit completion budget per request
pub const ANTHROPIC_MAX_TOKENS: u32 = 8192;

/// SSE line framing cap, matching the upstream proxy budget
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;

pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504, 520];
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Credential encryption layout (salt ‖ nonce ‖ ciphertext, base64)
pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const ENCRYPTION_SALT_LEN: usize = 16;
pub const ENCRYPTION_NONCE_LEN: usize = 12;

/// Database defaults
pub const DB_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA busy_timeout = 5000",
];
