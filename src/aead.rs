//! Per-frame authenticated encryption.
//!
//! [`AeadContext`] wraps `aes-gcm`, dispatching on key length (16/24/32 bytes
//! → AES-128/192/256-GCM). [`AeadChannel`] layers that context over any
//! [`crate::channel::Channel`]: each sent frame becomes `ciphertext ||
//! nonce`; each received frame is split back apart. Authentication failures
//! never surface on `recv` — they're pushed to a dedicated, non-blocking
//! error queue instead.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes192Gcm, Aes256Gcm, Nonce};
use rand::RngCore;
use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelError};

/// Fixed GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Errors raised by [`AeadContext`] construction or use.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AeadError {
    /// Key was not 16, 24, or 32 bytes.
    #[error("AEAD key must be 16, 24, or 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    /// Decryption failed authentication, or the frame was too short to
    /// contain a nonce.
    #[error("AEAD authentication failure")]
    AuthenticationFailure,
}

enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

/// A keyed AEAD construction with a fixed nonce size.
///
/// Immutable after construction.
pub struct AeadContext {
    cipher: Cipher,
}

impl std::fmt::Debug for AeadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadContext").finish_non_exhaustive()
    }
}

impl AeadContext {
    /// Construct a context from a symmetric key.
    ///
    /// # Errors
    ///
    /// Returns [`AeadError::InvalidKeyLength`] unless `key` is 16, 24, or 32
    /// bytes.
    pub fn new(key: &[u8]) -> Result<Self, AeadError> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(
                Aes128Gcm::new_from_slice(key)
                    .map_err(|_| AeadError::InvalidKeyLength(key.len()))?,
            ),
            24 => Cipher::Aes192(
                Aes192Gcm::new_from_slice(key)
                    .map_err(|_| AeadError::InvalidKeyLength(key.len()))?,
            ),
            32 => Cipher::Aes256(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|_| AeadError::InvalidKeyLength(key.len()))?,
            ),
            other => return Err(AeadError::InvalidKeyLength(other)),
        };
        Ok(Self { cipher })
    }

    /// Nonce length in bytes for this context. Fixed at 12 for GCM.
    #[must_use]
    pub fn nonce_size(&self) -> usize {
        NONCE_SIZE
    }

    /// Draw a fresh cryptographically random nonce.
    #[must_use]
    pub fn generate_nonce(&self) -> Vec<u8> {
        let mut nonce = vec![0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Draw `n` cryptographically random bytes, for use as a key.
    #[must_use]
    pub fn create_key(n: usize) -> Vec<u8> {
        let mut key = vec![0u8; n];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Encrypt `plaintext` under `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`AeadError::AuthenticationFailure`] if the underlying
    /// primitive rejects the nonce length.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, AeadError> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: plaintext,
            aad: &[],
        };
        match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce, payload),
            Cipher::Aes192(c) => c.encrypt(nonce, payload),
            Cipher::Aes256(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| AeadError::AuthenticationFailure)
    }

    /// Decrypt `ciphertext` under `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`AeadError::AuthenticationFailure`] if the tag does not
    /// verify.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, AeadError> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad: &[],
        };
        match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, payload),
            Cipher::Aes192(c) => c.decrypt(nonce, payload),
            Cipher::Aes256(c) => c.decrypt(nonce, payload),
        }
        .map_err(|_| AeadError::AuthenticationFailure)
    }
}

/// An AEAD-wrapped byte channel.
///
/// `send` transmits `encrypt(plaintext) || nonce`. `recv` splits the
/// trailing `nonce_size` bytes back off and decrypts. Auth failures and
/// malformed short frames are pushed onto a depth-1, non-blocking error
/// queue rather than returned from `recv` — callers observe them via
/// [`AeadChannel::errors`].
pub struct AeadChannel<C> {
    inner: C,
    ctx: AeadContext,
    err_tx: mpsc::Sender<AeadError>,
    err_rx: mpsc::Receiver<AeadError>,
}

impl<C: std::fmt::Debug> std::fmt::Debug for AeadChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadChannel")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<C: Channel> AeadChannel<C> {
    /// Wrap `inner` with AEAD framing under `ctx`.
    #[must_use]
    pub fn new(inner: C, ctx: AeadContext) -> Self {
        let (err_tx, err_rx) = mpsc::channel(1);
        Self {
            inner,
            ctx,
            err_tx,
            err_rx,
        }
    }

    /// Encrypt `plaintext` and send `ciphertext || nonce` on the underlying
    /// channel.
    ///
    /// On encryption failure the frame is not sent; the error is pushed to
    /// the error queue instead (best-effort, non-blocking).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the underlying channel's send fails.
    pub async fn send(&self, plaintext: &[u8]) -> Result<(), ChannelError> {
        let nonce = self.ctx.generate_nonce();
        match self.ctx.encrypt(plaintext, &nonce) {
            Ok(ciphertext) => {
                let mut frame = ciphertext;
                frame.extend_from_slice(&nonce);
                self.inner.send(&frame).await
            }
            Err(e) => {
                let _ = self.err_tx.try_send(e);
                Ok(())
            }
        }
    }

    /// Receive the next frame, decrypt it, and return the plaintext.
    ///
    /// Returns `None` when the underlying channel closes. On auth failure
    /// or a too-short frame, the error is pushed to the error queue and
    /// `recv` loops to the next frame.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            let frame = self.inner.recv().await?;
            if frame.len() < self.ctx.nonce_size() {
                let _ = self.err_tx.try_send(AeadError::AuthenticationFailure);
                continue;
            }
            let split = frame.len() - self.ctx.nonce_size();
            let (ciphertext, nonce) = frame.split_at(split);
            match self.ctx.decrypt(ciphertext, nonce) {
                Ok(plaintext) => return Some(plaintext),
                Err(e) => {
                    let _ = self.err_tx.try_send(e);
                    continue;
                }
            }
        }
    }

    /// Drain the next queued AEAD error, if any.
    ///
    /// Non-blocking: returns `None` immediately if no error is queued.
    pub fn try_recv_error(&mut self) -> Option<AeadError> {
        self.err_rx.try_recv().ok()
    }
}

/// Render bytes as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nibble_to_hex(b >> 4));
        out.push(nibble_to_hex(b & 0x0f));
    }
    out
}

/// Parse a lowercase or uppercase hex string into bytes.
///
/// # Errors
///
/// Returns `None` if `s` has odd length or contains non-hex characters.
#[must_use]
pub fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks(2) {
        let hi = hex_to_nibble(pair[0])?;
        let lo = hex_to_nibble(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Some(out)
}

fn nibble_to_hex(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        _ => (b'a' + (n - 10)) as char,
    }
}

fn hex_to_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LoopbackChannel;

    #[test]
    fn test_new_rejects_bad_key_length() {
        assert_eq!(
            AeadContext::new(&[0u8; 15]).unwrap_err(),
            AeadError::InvalidKeyLength(15)
        );
        assert_eq!(
            AeadContext::new(&[0u8; 33]).unwrap_err(),
            AeadError::InvalidKeyLength(33)
        );
    }

    #[test]
    fn test_new_accepts_valid_key_lengths() {
        assert!(AeadContext::new(&[0u8; 16]).is_ok());
        assert!(AeadContext::new(&[0u8; 24]).is_ok());
        assert!(AeadContext::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let ctx = AeadContext::new(&AeadContext::create_key(32)).unwrap();
        let nonce = ctx.generate_nonce();
        let ciphertext = ctx.encrypt(b"heyyooo", &nonce).unwrap();
        let plaintext = ctx.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(plaintext, b"heyyooo");
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let ctx = AeadContext::new(&AeadContext::create_key(32)).unwrap();
        let nonce = ctx.generate_nonce();
        let mut ciphertext = ctx.encrypt(b"heyyooo", &nonce).unwrap();
        ciphertext[0] ^= 0xff;
        assert_eq!(
            ctx.decrypt(&ciphertext, &nonce).unwrap_err(),
            AeadError::AuthenticationFailure
        );
    }

    #[test]
    fn test_decrypt_rejects_tampered_nonce() {
        let ctx = AeadContext::new(&AeadContext::create_key(32)).unwrap();
        let nonce = ctx.generate_nonce();
        let ciphertext = ctx.encrypt(b"heyyooo", &nonce).unwrap();
        let mut bad_nonce = nonce;
        bad_nonce[0] ^= 0xff;
        assert_eq!(
            ctx.decrypt(&ciphertext, &bad_nonce).unwrap_err(),
            AeadError::AuthenticationFailure
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = AeadContext::create_key(32);
        assert_eq!(from_hex(&to_hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_from_hex_rejects_odd_length() {
        assert_eq!(from_hex("abc"), None);
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        assert_eq!(from_hex("zz"), None);
    }

    #[tokio::test]
    async fn test_aead_channel_over_loopback_round_trip() {
        let key = AeadContext::create_key(32);
        let (a, b) = LoopbackChannel::pair(8);
        let mut a = AeadChannel::new(a, AeadContext::new(&key).unwrap());
        let mut b = AeadChannel::new(b, AeadContext::new(&key).unwrap());

        a.send(b"heyyooo").await.unwrap();
        let received = b.recv().await.unwrap();
        assert_eq!(received, b"heyyooo");
        assert!(b.try_recv_error().is_none());
    }

    #[tokio::test]
    async fn test_aead_channel_reports_tampered_frame_on_error_queue() {
        let key = AeadContext::create_key(32);
        let (a, b) = LoopbackChannel::pair(8);
        let ctx = AeadContext::new(&key).unwrap();
        let mut b = AeadChannel::new(b, AeadContext::new(&key).unwrap());

        // Inject a tampered frame directly on the underlying channel,
        // bypassing AeadChannel::send.
        let nonce = ctx.generate_nonce();
        let mut ciphertext = ctx.encrypt(b"heyyooo", &nonce).unwrap();
        ciphertext[0] ^= 0xff;
        let mut frame = ciphertext;
        frame.extend_from_slice(&nonce);
        a.send(&frame).await.unwrap();
        drop(a);

        // recv loops past the bad frame; since the channel then closes,
        // it returns None, but the error was queued first.
        let _ = b.recv().await;
        assert!(b.try_recv_error().is_some());
    }
}
