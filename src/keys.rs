//! Per-user provider credential vault.
//!
//! Plaintext keys never reach the database: each credential is sealed with
//! AES-256-GCM under a key derived from the server secret via PBKDF2, with a
//! fresh salt and nonce per write. The stored form is
//! `base64(salt || nonce || ciphertext)`.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use serde::Serialize;
use sha2::Sha256;

use crate::constants::{ENCRYPTION_NONCE_LEN, ENCRYPTION_SALT_LEN, PBKDF2_ITERATIONS};
use crate::db::{now_ms, DbPool};
use crate::str_utils::mask_secret;
use crate::types::{ApiKeySet, ProviderFamily, Result, RockpoolError, UserId};

/// Masked view of one stored credential, safe to return to clients.
#[derive(Debug, Clone, Serialize)]
pub struct KeyPreview {
    pub provider: ProviderFamily,
    pub preview: String,
}

fn derive_key(secret: &str, salt: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, PBKDF2_ITERATIONS, &mut out);
    out
}

pub fn encrypt_key(plaintext: &str, secret: &str) -> Result<String> {
    let mut salt = [0u8; ENCRYPTION_SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let derived = derive_key(secret, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = match cipher.encrypt(&nonce, plaintext.as_bytes()) {
        Ok(ct) => ct,
        Err(_) => return Err(RockpoolError::Crypto("encryption failed".to_string()).into()),
    };

    let mut combined =
        Vec::with_capacity(ENCRYPTION_SALT_LEN + ENCRYPTION_NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&salt);
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(combined))
}

pub fn decrypt_key(stored: &str, secret: &str) -> Result<String> {
    let combined = match STANDARD.decode(stored) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Err(RockpoolError::Crypto(format!("invalid encoding: {}", e)).into());
        }
    };

    if combined.len() < ENCRYPTION_SALT_LEN + ENCRYPTION_NONCE_LEN {
        return Err(RockpoolError::Crypto("stored credential too short".to_string()).into());
    }

    let (salt, rest) = combined.split_at(ENCRYPTION_SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(ENCRYPTION_NONCE_LEN);

    let derived = derive_key(secret, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));

    let plaintext = match cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
        Ok(pt) => pt,
        Err(_) => return Err(RockpoolError::Crypto("decryption failed".to_string()).into()),
    };

    match String::from_utf8(plaintext) {
        Ok(s) => Ok(s),
        Err(_) => {
            Err(RockpoolError::Crypto("decrypted credential is not utf-8".to_string()).into())
        }
    }
}

/// Upserts one provider cell on the user's single credential row.
pub async fn save_key(
    db: &DbPool,
    user_id: &UserId,
    family: ProviderFamily,
    plaintext: &str,
    secret: &str,
) -> Result<()> {
    let sealed = encrypt_key(plaintext, secret)?;

    // Column name comes from the family enum, never from request input.
    let sql = format!(
        "INSERT INTO api_keys (user_id, {col}, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET {col} = excluded.{col}, updated_at = excluded.updated_at",
        col = family.as_str()
    );
    sqlx::query(&sql)
        .bind(&user_id.0)
        .bind(&sealed)
        .bind(now_ms())
        .execute(db)
        .await?;

    tracing::info!("[⚙️ ] Stored {} credential for {}", family, user_id);
    Ok(())
}

/// Clears one provider cell. Missing rows and already-empty cells are fine.
pub async fn remove_key(db: &DbPool, user_id: &UserId, family: ProviderFamily) -> Result<()> {
    let sql = format!(
        "UPDATE api_keys SET {col} = NULL, updated_at = ? WHERE user_id = ?",
        col = family.as_str()
    );
    sqlx::query(&sql)
        .bind(now_ms())
        .bind(&user_id.0)
        .execute(db)
        .await?;

    tracing::info!("[⚙️ ] Removed {} credential for {}", family, user_id);
    Ok(())
}

fn decrypt_cell(
    cell: Option<String>,
    family: ProviderFamily,
    user_id: &UserId,
    secret: &str,
) -> Option<String> {
    let stored = cell?;
    match decrypt_key(&stored, secret) {
        Ok(plain) => Some(plain),
        Err(e) => {
            // A cell sealed under an older secret stays in place but is
            // unusable; resolution then reports the key as missing.
            tracing::warn!(
                "[⚙️ ] Skipping undecryptable {} credential for {}: {}",
                family,
                user_id,
                e
            );
            None
        }
    }
}

/// Loads and decrypts every credential the user has on file.
pub async fn load_keys(db: &DbPool, user_id: &UserId, secret: &str) -> Result<ApiKeySet> {
    type KeyRow = (
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    );

    let row = sqlx::query_as::<_, KeyRow>(
        "SELECT openai, groq, anthropic, google, openrouter FROM api_keys WHERE user_id = ?",
    )
    .bind(&user_id.0)
    .fetch_optional(db)
    .await?;

    let (openai, groq, anthropic, google, openrouter) = match row {
        Some(r) => r,
        None => return Ok(ApiKeySet::default()),
    };

    Ok(ApiKeySet {
        openai: decrypt_cell(openai, ProviderFamily::OpenAi, user_id, secret),
        groq: decrypt_cell(groq, ProviderFamily::Groq, user_id, secret),
        anthropic: decrypt_cell(anthropic, ProviderFamily::Anthropic, user_id, secret),
        google: decrypt_cell(google, ProviderFamily::Google, user_id, secret),
        openrouter: decrypt_cell(openrouter, ProviderFamily::OpenRouter, user_id, secret),
    })
}

/// Masked previews of the credentials the user has on file, in a stable
/// provider order. Cells that fail to decrypt are omitted.
pub async fn key_previews(db: &DbPool, user_id: &UserId, secret: &str) -> Result<Vec<KeyPreview>> {
    let keys = load_keys(db, user_id, secret).await?;

    let mut previews = Vec::new();
    for &family in ProviderFamily::ALL {
        if let Some(value) = keys.get(family) {
            previews.push(KeyPreview {
                provider: family,
                preview: mask_secret(value),
            });
        }
    }
    Ok(previews)
}
