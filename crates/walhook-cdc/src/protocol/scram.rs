//! SCRAM-SHA-256 authentication (RFC 5802, RFC 7677)
//!
//! PostgreSQL defaults to `scram-sha-256` password auth since version 14,
//! so the replication client carries its own SASL state machine. Channel
//! binding (SCRAM-SHA-256-PLUS) is not offered.
//!
//! Flow: `client_first()` → server challenge → `client_final(challenge)` →
//! server verifier → `verify_server(verifier)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// SASL authentication error.
#[derive(Debug, Error)]
pub enum SaslError {
    #[error("Invalid server message: {0}")]
    InvalidServerMessage(String),

    #[error("Server nonce does not extend the client nonce")]
    InvalidNonce,

    #[error("Server signature verification failed")]
    ServerVerificationFailed,

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("SCRAM error from server: {0}")]
    ServerError(String),
}

type Result<T> = std::result::Result<T, SaslError>;

/// SCRAM-SHA-256 exchange state.
pub struct ScramSha256 {
    username: String,
    password: String,
    client_nonce: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramSha256 {
    /// SASL mechanism name advertised to the server.
    pub const MECHANISM: &'static str = "SCRAM-SHA-256";

    pub fn new(username: &str, password: &str) -> Self {
        use rand::RngCore;

        let mut nonce_bytes = [0u8; 24];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        Self {
            username: escape_username(username),
            password: password.to_string(),
            client_nonce: BASE64.encode(nonce_bytes),
            auth_message: None,
            salted_password: None,
        }
    }

    #[cfg(test)]
    fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            username: escape_username(username),
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    /// Build the client-first-message: `n,,n=<user>,r=<nonce>`.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.client_nonce)
    }

    /// Consume the server-first-message and produce the client-final-message
    /// carrying the proof.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|e| SaslError::InvalidServerMessage(e.to_string()))?;

        let (nonce, salt, iterations) = parse_server_first(server_first)?;
        if !nonce.starts_with(&self.client_nonce) {
            return Err(SaslError::InvalidNonce);
        }

        let salted_password = hi(self.password.as_bytes(), &salt, iterations);
        self.salted_password = Some(salted_password);

        // c= is the base64 of the gs2-header "n,," (no channel binding)
        let without_proof = format!("c={},r={}", BASE64.encode("n,,"), nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        self.auth_message = Some(auth_message);

        let mut proof = [0u8; 32];
        for (i, b) in proof.iter_mut().enumerate() {
            *b = client_key[i] ^ client_signature[i];
        }

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes())
    }

    /// Verify the server-final-message (`v=<signature>`), proving the
    /// server also knows the password.
    pub fn verify_server(&self, server_final: &[u8]) -> Result<()> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|e| SaslError::InvalidServerMessage(e.to_string()))?;

        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(SaslError::ServerError(error.to_string()));
        }

        let signature_b64 = server_final.strip_prefix("v=").ok_or_else(|| {
            SaslError::InvalidServerMessage("Expected server signature".to_string())
        })?;
        let server_signature = BASE64.decode(signature_b64)?;

        let salted_password = self
            .salted_password
            .ok_or_else(|| SaslError::InvalidServerMessage("Exchange not completed".to_string()))?;
        let auth_message = self
            .auth_message
            .as_ref()
            .ok_or_else(|| SaslError::InvalidServerMessage("Exchange not completed".to_string()))?;

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let expected = hmac_sha256(&server_key, auth_message.as_bytes());

        if !constant_time_eq(&server_signature, &expected) {
            return Err(SaslError::ServerVerificationFailed);
        }
        Ok(())
    }
}

impl fmt::Debug for ScramSha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramSha256")
            .field("username", &self.username)
            .field("password", &"redacted")
            .field("client_nonce", &self.client_nonce)
            .finish()
    }
}

fn parse_server_first(msg: &str) -> Result<(String, Vec<u8>, u32)> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = Some(BASE64.decode(value)?);
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = Some(value.parse::<u32>().map_err(|e| {
                SaslError::InvalidServerMessage(format!("Bad iteration count: {}", e))
            })?);
        }
        // unknown attributes (m=, ...) are ignored
    }

    match (nonce, salt, iterations) {
        (Some(n), Some(s), Some(i)) => Ok((n, s, i)),
        _ => Err(SaslError::InvalidServerMessage(
            "Missing nonce, salt, or iterations".to_string(),
        )),
    }
}

/// Hi(password, salt, i) = PBKDF2-HMAC-SHA256
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    // cannot fail for a 32-byte output
    let _ = pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out);
    out
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Escape '=' and ',' per the SCRAM username grammar.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_first_shape() {
        let scram = ScramSha256::with_nonce("walhook", "pencil", "rOprNGfwEbeRWgbNEkqO");
        let msg = String::from_utf8(scram.client_first()).unwrap();
        assert_eq!(msg, "n,,n=walhook,r=rOprNGfwEbeRWgbNEkqO");
    }

    #[test]
    fn test_username_escaping() {
        let scram = ScramSha256::with_nonce("u=ser,x", "pw", "nonce");
        let msg = String::from_utf8(scram.client_first()).unwrap();
        assert!(msg.contains("n=u=3Dser=2Cx"));
    }

    #[test]
    fn test_parse_server_first() {
        let (nonce, salt, iterations) =
            parse_server_first("r=abc+def,s=c2FsdA==,i=4096").unwrap();
        assert_eq!(nonce, "abc+def");
        assert_eq!(salt, b"salt");
        assert_eq!(iterations, 4096);
    }

    #[test]
    fn test_rejects_foreign_nonce() {
        let mut scram = ScramSha256::with_nonce("u", "pw", "clientnonce");
        let result = scram.client_final(b"r=othernonce,s=c2FsdA==,i=4096");
        assert!(matches!(result, Err(SaslError::InvalidNonce)));
    }

    #[test]
    fn test_exchange_produces_proof() {
        let mut scram = ScramSha256::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO");
        let server_first =
            b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let client_final = String::from_utf8(scram.client_final(server_first).unwrap()).unwrap();
        assert!(client_final.starts_with("c=biws,r="));
        assert!(client_final.contains(",p="));
    }

    #[test]
    fn test_server_error_is_surfaced() {
        let scram = ScramSha256::with_nonce("u", "pw", "n");
        let result = scram.verify_server(b"e=invalid-proof");
        assert!(matches!(result, Err(SaslError::ServerError(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let scram = ScramSha256::new("u", "sup3rsecret");
        let out = format!("{:?}", scram);
        assert!(!out.contains("sup3rsecret"));
    }
}
