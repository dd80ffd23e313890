//! System-prompt resolution: fetch, size-cap, attempt decryption, cache.
//!
//! The decrypt-or-fallback behaviour is a known soft spot: a corrupted or partially-encrypted
//! payload becomes a prompt-injection vector under this design, since it's silently treated
//! as a valid plaintext prompt instead of being rejected. Kept as-is rather than silently
//! patched — flagging it here for security review rather than hiding the tradeoff.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;
use tokio::sync::Mutex;

const MAX_SYSTEM_PROMPT_BYTES: u64 = 5_000;
/// Slack above the HEAD-advertised size before the bounded GET reader gives up. A HEAD-then-
/// GET protocol alone never verifies the GET body actually respects the advertised size, so
/// the reader enforces it directly instead of trusting the server's own Content-Length.
const BOUNDED_READ_SLACK_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("system prompt exceeds size cap, skipped")]
    OversizedPrompt,
    #[error("response body exceeded the HEAD-advertised size")]
    BodyExceededAdvertisedSize,
}

struct CacheEntry {
    value: String,
    expires_at: std::time::Instant,
}

/// Fixed-capacity approximate-LRU with per-entry TTL. Eviction order follows insertion order,
/// not access order — a deliberate simplification that avoids pulling in a dedicated LRU
/// crate for a cache this small.
struct PromptCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<alloy_primitives::Address, CacheEntry>,
    order: VecDeque<alloy_primitives::Address>,
}

impl PromptCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &alloy_primitives::Address) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > std::time::Instant::now() {
                return Some(entry.value.clone());
            }
            self.entries.remove(key);
        }
        None
    }

    fn insert(&mut self, key: alloy_primitives::Address, value: String) {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key);
            while self.entries.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                } else {
                    break;
                }
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: std::time::Instant::now() + self.ttl,
            },
        );
    }
}

pub struct PromptResolver {
    http: reqwest::Client,
    rsa_private_key: RsaPrivateKey,
    cache: Mutex<PromptCache>,
}

impl PromptResolver {
    pub fn new(rsa_private_key: RsaPrivateKey, capacity: usize, ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            rsa_private_key,
            cache: Mutex::new(PromptCache::new(capacity.max(1), ttl)),
        }
    }

    /// Resolve the system prompt for `collection`, given its on-chain `systemPromptUri`.
    pub async fn resolve(
        &self,
        collection: alloy_primitives::Address,
        uri: &str,
    ) -> Result<String, PromptError> {
        if let Some(cached) = self.cache.lock().await.get(&collection) {
            return Ok(cached);
        }

        let bytes = self.fetch_size_capped(uri).await?;
        let text = self.decrypt_or_fallback(&bytes);

        self.cache.lock().await.insert(collection, text.clone());
        Ok(text)
    }

    async fn fetch_size_capped(&self, uri: &str) -> Result<Vec<u8>, PromptError> {
        let head = self.http.head(uri).send().await?;
        let advertised = head
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let Some(len) = advertised {
            if len >= MAX_SYSTEM_PROMPT_BYTES {
                tracing::warn!(uri, len, "system prompt exceeds size cap, skipping fetch");
                return Err(PromptError::OversizedPrompt);
            }
        }

        let mut response = self.http.get(uri).send().await?;
        let cap = advertised.unwrap_or(MAX_SYSTEM_PROMPT_BYTES) as usize
            + BOUNDED_READ_SLACK_BYTES;

        // Stop reading the moment the body exceeds what HEAD advertised, rather than trusting
        // a potentially hostile server to stop sending bytes on its own.
        let mut buf = Vec::with_capacity(cap.min(1 << 20));
        while let Some(chunk) = response.chunk().await? {
            buf.extend_from_slice(&chunk);
            if buf.len() > cap {
                return Err(PromptError::BodyExceededAdvertisedSize);
            }
        }
        Ok(buf)
    }

    /// Attempt RSA-OAEP-SHA256 decryption; on any failure fall back to treating the raw
    /// bytes as plaintext, so an unencrypted submitter prompt still resolves correctly.
    fn decrypt_or_fallback(&self, bytes: &[u8]) -> String {
        let padding = Oaep::new::<Sha256>();
        match self.rsa_private_key.decrypt(padding, bytes) {
            Ok(plaintext) => String::from_utf8_lossy(&plaintext).into_owned(),
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;
    use rand::rngs::OsRng;

    fn keypair() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut OsRng, 1024).unwrap()
    }

    #[test]
    fn decrypts_valid_ciphertext() {
        let private_key = keypair();
        let public_key = RsaPublicKey::from(&private_key);
        let padding = Oaep::new::<Sha256>();
        let ciphertext = public_key
            .encrypt(&mut OsRng, padding, b"decrypted text")
            .unwrap();

        let resolver = PromptResolver::new(private_key, 10, Duration::from_secs(60));
        assert_eq!(resolver.decrypt_or_fallback(&ciphertext), "decrypted text");
    }

    #[test]
    fn falls_back_to_raw_bytes_on_decrypt_failure() {
        let private_key = keypair();
        let resolver = PromptResolver::new(private_key, 10, Duration::from_secs(60));
        assert_eq!(
            resolver.decrypt_or_fallback(b"not ciphertext at all"),
            "not ciphertext at all"
        );
    }
}
