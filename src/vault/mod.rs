//! Credential Vault: AEAD-encrypted per-user credentials and per-venue WAF session
//! artifacts, stored in the KVS.

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::kvs::{Kvs, KvsError};

const VERSION_PREFIX: &str = "v1:";
const WAF_COOKIE_PREFIXES: &[&str] = &["_incap_", "incap_ses_", "_visid_", "visid_incap_", "nlbi_"];

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("corrupt ciphertext: {0}")]
    Corrupt(String),
    #[error("vault misconfigured: {0}")]
    Config(String),
    #[error(transparent)]
    Kvs(#[from] KvsError),
}

/// A single WAF-issued cookie, restricted at construction time to a recognized prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub expires: Option<i64>,
}

/// Returns whether `name` matches one of the recognized WAF cookie-name prefixes.
pub fn is_waf_cookie_name(name: &str) -> bool {
    WAF_COOKIE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Per-venue WAF session: cookies plus the user agent they were captured with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafSession {
    pub cookies: Vec<WafCookie>,
    pub user_agent: String,
}

impl WafSession {
    /// Merges newly observed cookies into this session, replacing any existing cookie
    /// of the same name. Cookies whose name does not match a recognized WAF prefix are
    /// ignored by the caller before this is invoked.
    pub fn merge_cookies(&mut self, fresh: Vec<WafCookie>) {
        for cookie in fresh {
            self.cookies.retain(|c| c.name != cookie.name);
            self.cookies.push(cookie);
        }
    }
}

/// Per-owner encrypted credentials, as stored at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    auth_token: String,
    payment_method_id: String,
}

/// Per-owner credentials, decrypted, ready for use by the Upstream Protocol Client.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub owner_id: String,
    pub auth_token: String,
    pub payment_method_id: String,
}

/// AEAD-encrypted credential and WAF session storage backed by a [`Kvs`].
pub struct CredentialVault {
    kvs: Arc<dyn Kvs>,
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn new(kvs: Arc<dyn Kvs>, key_hex: &str) -> Result<Self, VaultError> {
        let key_bytes = hex_decode(key_hex)
            .map_err(|e| VaultError::Config(format!("vault key is not valid hex: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(VaultError::Config(format!(
                "vault key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        Ok(Self { kvs, cipher })
    }

    /// Encrypts `plaintext` with a random 96-bit nonce, returning a base64-encoded,
    /// `v1:`-prefixed ciphertext blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Corrupt(format!("encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(nonce.len() + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{VERSION_PREFIX}{}", BASE64.encode(payload)))
    }

    /// Decrypts a `v1:`-prefixed ciphertext blob. Returns an error on corrupt ciphertext;
    /// the caller is responsible for treating an unprefixed value as legacy plaintext.
    pub fn decrypt(&self, versioned_ciphertext: &str) -> Result<String, VaultError> {
        let encoded = versioned_ciphertext
            .strip_prefix(VERSION_PREFIX)
            .ok_or_else(|| VaultError::Corrupt("missing version prefix".to_string()))?;

        let payload = BASE64
            .decode(encoded)
            .map_err(|e| VaultError::Corrupt(format!("invalid base64: {e}")))?;

        if payload.len() < 12 {
            return Err(VaultError::Corrupt("ciphertext too short for nonce".to_string()));
        }
        let (nonce, ciphertext) = payload.split_at(12);

        let plaintext = self
            .cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|e| VaultError::Corrupt(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| VaultError::Corrupt(format!("decrypted payload is not utf-8: {e}")))
    }

    /// Reads and decrypts a value that may be a legacy unprefixed plaintext. If so, the
    /// caller-supplied `reencrypt` closure is invoked to persist a migrated ciphertext;
    /// failures there are logged and swallowed, never surfaced to the read.
    fn read_with_migration(&self, stored: &str) -> (String, bool) {
        if stored.starts_with(VERSION_PREFIX) {
            match self.decrypt(stored) {
                Ok(plaintext) => (plaintext, false),
                Err(e) => {
                    // corrupt ciphertext under a recognized prefix is a real error, but this
                    // helper only distinguishes legacy-plaintext vs versioned; surface as-is.
                    warn!(error = %e, "failed to decrypt versioned value");
                    (stored.to_string(), false)
                }
            }
        } else {
            (stored.to_string(), true)
        }
    }

    fn credentials_key(owner_id: &str) -> String {
        format!("user_credentials:{owner_id}")
    }

    fn waf_session_key(venue_id: i64) -> String {
        format!("cookies:{venue_id}")
    }

    /// Reads `UserCredentials` for `owner_id`, transparently migrating any legacy
    /// unprefixed plaintext fields by re-encrypting and overwriting in place.
    pub async fn get_credentials(
        &self,
        owner_id: &str,
    ) -> Result<Option<UserCredentials>, VaultError> {
        let Some(raw) = self.kvs.get(&Self::credentials_key(owner_id)).await? else {
            return Ok(None);
        };
        let stored: StoredCredentials = serde_json::from_str(&raw)
            .map_err(|e| VaultError::Corrupt(format!("credential record is not valid json: {e}")))?;

        let (auth_token, auth_needs_migration) = self.read_with_migration(&stored.auth_token);
        let (payment_method_id, payment_needs_migration) =
            self.read_with_migration(&stored.payment_method_id);

        if auth_needs_migration || payment_needs_migration {
            let reencrypted = StoredCredentials {
                auth_token: self.encrypt(&auth_token).unwrap_or(stored.auth_token),
                payment_method_id: self
                    .encrypt(&payment_method_id)
                    .unwrap_or(stored.payment_method_id),
            };
            if let Err(e) = self.set_credentials_raw(owner_id, &reencrypted).await {
                warn!(owner_id, error = %e, "failed to re-encrypt legacy credentials on read");
            }
        }

        Ok(Some(UserCredentials {
            owner_id: owner_id.to_string(),
            auth_token,
            payment_method_id,
        }))
    }

    async fn set_credentials_raw(
        &self,
        owner_id: &str,
        stored: &StoredCredentials,
    ) -> Result<(), VaultError> {
        let serialized = serde_json::to_string(stored)
            .map_err(|e| VaultError::Corrupt(format!("serialization failed: {e}")))?;
        self.kvs
            .set(&Self::credentials_key(owner_id), &serialized, None)
            .await?;
        Ok(())
    }

    /// Encrypts and stores `auth_token`/`payment_method_id` for `owner_id`.
    pub async fn set_credentials(
        &self,
        owner_id: &str,
        auth_token: &str,
        payment_method_id: &str,
    ) -> Result<(), VaultError> {
        let stored = StoredCredentials {
            auth_token: self.encrypt(auth_token)?,
            payment_method_id: self.encrypt(payment_method_id)?,
        };
        self.set_credentials_raw(owner_id, &stored).await
    }

    pub async fn delete_credentials(&self, owner_id: &str) -> Result<(), VaultError> {
        self.kvs.delete(&Self::credentials_key(owner_id)).await?;
        Ok(())
    }

    pub async fn has_credentials(&self, owner_id: &str) -> Result<bool, VaultError> {
        Ok(self.kvs.exists(&Self::credentials_key(owner_id)).await?)
    }

    /// Loads the WAF session for `venue_id`, if present and unexpired.
    pub async fn get_waf_session(&self, venue_id: i64) -> Result<Option<WafSession>, VaultError> {
        let Some(raw) = self.kvs.get(&Self::waf_session_key(venue_id)).await? else {
            return Ok(None);
        };
        let session: WafSession = serde_json::from_str(&raw)
            .map_err(|e| VaultError::Corrupt(format!("waf session record is not valid json: {e}")))?;
        Ok(Some(session))
    }

    pub async fn set_waf_session(
        &self,
        venue_id: i64,
        session: &WafSession,
        ttl: Duration,
    ) -> Result<(), VaultError> {
        let serialized = serde_json::to_string(session)
            .map_err(|e| VaultError::Corrupt(format!("serialization failed: {e}")))?;
        self.kvs
            .set(&Self::waf_session_key(venue_id), &serialized, Some(ttl))
            .await?;
        Ok(())
    }

    pub async fn delete_waf_session(&self, venue_id: i64) -> Result<(), VaultError> {
        self.kvs.delete(&Self::waf_session_key(venue_id)).await?;
        Ok(())
    }

    pub async fn waf_session_ttl(&self, venue_id: i64) -> Result<Option<Duration>, VaultError> {
        Ok(self.kvs.ttl(&Self::waf_session_key(venue_id)).await?)
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd-length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::InMemoryKvs;

    fn test_vault() -> CredentialVault {
        let key_hex = "00".repeat(32);
        CredentialVault::new(Arc::new(InMemoryKvs::new()), &key_hex).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let vault = test_vault();
        let ciphertext = vault.encrypt("super-secret-token").unwrap();
        assert!(ciphertext.starts_with(VERSION_PREFIX));
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "super-secret-token");
    }

    #[test]
    fn decrypt_rejects_missing_prefix() {
        let vault = test_vault();
        assert!(vault.decrypt("plaintext").is_err());
    }

    #[test]
    fn decrypt_rejects_corrupt_ciphertext() {
        let vault = test_vault();
        let mut ciphertext = vault.encrypt("hello").unwrap();
        ciphertext.push('!');
        assert!(vault.decrypt(&ciphertext).is_err());
    }

    #[tokio::test]
    async fn legacy_plaintext_read_succeeds_and_migrates() {
        let vault = test_vault();
        let stored = StoredCredentials {
            auth_token: "plaintext".to_string(),
            payment_method_id: "12345".to_string(),
        };
        vault.set_credentials_raw("owner-1", &stored).await.unwrap();

        let creds = vault.get_credentials("owner-1").await.unwrap().unwrap();
        assert_eq!(creds.auth_token, "plaintext");
        assert_eq!(creds.payment_method_id, "12345");

        // second read observes the migrated, versioned ciphertext
        let raw = vault
            .kvs
            .get(&CredentialVault::credentials_key("owner-1"))
            .await
            .unwrap()
            .unwrap();
        let reencrypted: StoredCredentials = serde_json::from_str(&raw).unwrap();
        assert!(reencrypted.auth_token.starts_with(VERSION_PREFIX));
    }

    #[test]
    fn is_waf_cookie_name_matches_recognized_prefixes() {
        assert!(is_waf_cookie_name("_incap_ses_123"));
        assert!(is_waf_cookie_name("visid_incap_99"));
        assert!(!is_waf_cookie_name("session_id"));
    }

    #[test]
    fn merge_cookies_replaces_by_name() {
        let mut session = WafSession {
            cookies: vec![WafCookie {
                name: "_incap_ses_1".into(),
                value: "old".into(),
                domain: "example.com".into(),
                path: "/".into(),
                secure: true,
                http_only: false,
                expires: None,
            }],
            user_agent: "ua".into(),
        };
        session.merge_cookies(vec![WafCookie {
            name: "_incap_ses_1".into(),
            value: "new".into(),
            domain: "example.com".into(),
            path: "/".into(),
            secure: true,
            http_only: false,
            expires: None,
        }]);
        assert_eq!(session.cookies.len(), 1);
        assert_eq!(session.cookies[0].value, "new");
    }
}
