//! Encryption collaborator boundary.
//!
//! The core treats encryption as an opaque per-conversation capability.
//! Failures are never fatal: every call site degrades to passing the
//! input through unchanged, with a warning log.

use webchat_proto::message::ConversationId;

/// Errors reported by a [`Cipher`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// Encryption failed.
    #[error("encrypt failed: {0}")]
    Encrypt(String),
    /// Decryption failed.
    #[error("decrypt failed: {0}")]
    Decrypt(String),
}

/// Opaque encrypt/decrypt capability, keyed per conversation.
///
/// Key management is entirely the implementor's concern — the core only
/// calls these two methods at the wire boundary.
pub trait Cipher: Send + Sync {
    /// Encrypt plain text for a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encrypt`] when the conversation key is
    /// unavailable or the operation fails.
    fn encrypt(&self, plain: &str, conversation: &ConversationId) -> Result<String, CipherError>;

    /// Decrypt cipher text from a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Decrypt`] when the conversation key is
    /// unavailable or the operation fails.
    fn decrypt(&self, cipher: &str, conversation: &ConversationId) -> Result<String, CipherError>;
}

/// Cipher that passes text through unchanged. Used when the deployment
/// has no end-to-end encryption, and in tests.
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn encrypt(&self, plain: &str, _conversation: &ConversationId) -> Result<String, CipherError> {
        Ok(plain.to_string())
    }

    fn decrypt(&self, cipher: &str, _conversation: &ConversationId) -> Result<String, CipherError> {
        Ok(cipher.to_string())
    }
}

/// Encrypt, degrading to the plain text on failure.
pub(crate) fn encrypt_or_passthrough<C: Cipher>(
    cipher: &C,
    text: &str,
    conversation: &ConversationId,
) -> String {
    match cipher.encrypt(text, conversation) {
        Ok(encrypted) => encrypted,
        Err(e) => {
            tracing::warn!(conversation = %conversation, err = %e, "encrypt failed, sending as-is");
            text.to_string()
        }
    }
}

/// Decrypt, degrading to the cipher text on failure.
pub(crate) fn decrypt_or_passthrough<C: Cipher>(
    cipher: &C,
    text: &str,
    conversation: &ConversationId,
) -> String {
    match cipher.decrypt(text, conversation) {
        Ok(decrypted) => decrypted,
        Err(e) => {
            tracing::warn!(conversation = %conversation, err = %e, "decrypt failed, showing as-is");
            text.to_string()
        }
    }
}
