//! SCRAM-SHA-1 SASL mechanism implementation.
//!
//! Implements the client side of SCRAM-SHA-1 authentication per RFC 5802:
//!
//! 1. Client sends client-first-message: `n,,n=user,r=clientnonce`
//! 2. Server sends server-first-message: `r=nonce,s=salt,i=iterations`
//! 3. Client sends client-final-message: `c=biws,r=nonce,p=clientproof`
//! 4. Server sends server-final-message: `v=serversignature`
//!
//! The client independently derives the expected ServerSignature during step
//! 3 and verifies the server's `v=` value in step 4; a mismatch means the
//! server never knew the password and the connection must be torn down.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::XmppError;

/// Minimum acceptable PBKDF2 iteration count. RFC 5802 considers fewer than
/// 4096 iterations insecure; such challenges are rejected before any key
/// derivation runs.
pub const MIN_ITERATIONS: u32 = 4096;

/// Length of the generated client nonce in characters.
const NONCE_LENGTH: usize = 16;

/// GS2 header for "no channel binding", base64-encoded `n,,`.
const GS2_CHANNEL_BINDING: &str = "biws";

/// State for one client-side SCRAM-SHA-1 exchange.
///
/// Created when the mechanism is selected, discarded after success or
/// failure.
#[derive(Debug, Clone)]
pub struct ScramClient {
    /// The user's password (consumed by key derivation on challenge)
    password: String,
    /// client-first-message-bare, kept for the AuthMessage computation
    client_first_bare: String,
    /// Expected ServerSignature (base64), available after the challenge
    server_signature: Option<String>,
}

/// Parsed server-first-message attributes.
#[derive(Debug)]
struct ScramChallenge {
    /// Combined client+server nonce
    nonce: String,
    /// Decoded salt bytes
    salt: Vec<u8>,
    /// PBKDF2 iteration count
    iterations: u32,
}

impl ScramClient {
    /// Start an exchange with a freshly generated nonce.
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_nonce(username, password, generate_nonce())
    }

    /// Start an exchange with a caller-provided nonce.
    ///
    /// Used by tests to make the exchange deterministic.
    pub fn with_nonce(username: &str, password: &str, nonce: String) -> Self {
        let client_first_bare = format!("n={},r={}", encode_sasl_name(username), nonce);
        Self {
            password: password.to_string(),
            client_first_bare,
            server_signature: None,
        }
    }

    /// The base64 payload for the `<auth mechanism='SCRAM-SHA-1'>` element.
    pub fn initial_response(&self) -> String {
        BASE64_STANDARD.encode(format!("n,,{}", self.client_first_bare))
    }

    /// Process a base64 challenge payload and produce the base64 response
    /// payload for the `<response>` element.
    pub fn handle_challenge_b64(&mut self, challenge_b64: &str) -> Result<String, XmppError> {
        let decoded = BASE64_STANDARD
            .decode(challenge_b64.trim())
            .map_err(|e| XmppError::auth_failed(format!("Invalid challenge base64: {}", e)))?;
        let challenge = String::from_utf8(decoded)
            .map_err(|e| XmppError::auth_failed(format!("Challenge is not UTF-8: {}", e)))?;
        let client_final = self.handle_challenge(&challenge)?;
        Ok(BASE64_STANDARD.encode(client_final))
    }

    /// Process the decoded server-first-message and produce the
    /// client-final-message.
    ///
    /// Also derives the expected ServerSignature for later verification of
    /// the server's `<success>` payload.
    pub fn handle_challenge(&mut self, challenge: &str) -> Result<String, XmppError> {
        let parsed = parse_challenge(challenge)?;

        // SaltedPassword = Hi(password, salt, i)
        let salted_password = hi(self.password.as_bytes(), &parsed.salt, parsed.iterations);

        // ClientKey = HMAC(SaltedPassword, "Client Key")
        let client_key = hmac_sha1(&salted_password, b"Client Key");
        // StoredKey = H(ClientKey)
        let stored_key = sha1_digest(&client_key);

        let client_final_bare = format!("c={},r={}", GS2_CHANNEL_BINDING, parsed.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, challenge, client_final_bare
        );

        // ClientSignature = HMAC(StoredKey, AuthMessage)
        let client_signature = hmac_sha1(&stored_key, auth_message.as_bytes());

        // ClientProof = ClientKey XOR ClientSignature
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        // ServerSignature = HMAC(ServerKey, AuthMessage), verified against
        // the success payload later.
        let server_key = hmac_sha1(&salted_password, b"Server Key");
        let server_signature = hmac_sha1(&server_key, auth_message.as_bytes());
        self.server_signature = Some(BASE64_STANDARD.encode(&server_signature));

        Ok(format!(
            "{},p={}",
            client_final_bare,
            BASE64_STANDARD.encode(&client_proof)
        ))
    }

    /// Verify the `v=` attribute of a base64 `<success>` payload against the
    /// locally derived ServerSignature.
    ///
    /// A mismatch is a trust violation: the peer proved nothing about
    /// knowing the password.
    pub fn verify_success_b64(&self, payload_b64: &str) -> Result<(), XmppError> {
        let expected = self
            .server_signature
            .as_deref()
            .ok_or_else(|| XmppError::auth_failed("Success received before challenge"))?;

        let decoded = BASE64_STANDARD
            .decode(payload_b64.trim())
            .map_err(|e| XmppError::auth_failed(format!("Invalid success base64: {}", e)))?;
        let payload = String::from_utf8(decoded)
            .map_err(|e| XmppError::auth_failed(format!("Success payload is not UTF-8: {}", e)))?;

        let received = payload
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| XmppError::auth_failed("Success payload has no server signature"))?;

        if received != expected {
            return Err(XmppError::auth_failed("Server signature mismatch"));
        }
        Ok(())
    }

    /// The expected ServerSignature (base64), if the challenge has been
    /// processed.
    pub fn server_signature(&self) -> Option<&str> {
        self.server_signature.as_deref()
    }
}

/// Parse the comma-separated server-first-message.
///
/// Required attributes are `r=` (nonce), `s=` (base64 salt), `i=`
/// (iterations). An `m=` attribute is a mandatory extension and aborts the
/// exchange per RFC 5802; other unknown single-letter keys are ignored.
fn parse_challenge(challenge: &str) -> Result<ScramChallenge, XmppError> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations: Option<u32> = None;

    for attr in challenge.split(',') {
        let Some((key, value)) = attr.split_once('=') else {
            continue;
        };
        match key {
            "r" => nonce = Some(value.to_string()),
            "s" => {
                let decoded = BASE64_STANDARD
                    .decode(value)
                    .map_err(|e| XmppError::auth_failed(format!("Invalid salt base64: {}", e)))?;
                salt = Some(decoded);
            }
            "i" => {
                let parsed = value
                    .parse()
                    .map_err(|e| XmppError::auth_failed(format!("Invalid iteration count: {}", e)))?;
                iterations = Some(parsed);
            }
            "m" => {
                return Err(XmppError::auth_failed(
                    "Challenge carries a mandatory extension (m=), aborting per RFC 5802",
                ));
            }
            other => {
                debug!(key = other, "Ignoring optional SCRAM extension");
            }
        }
    }

    let nonce = nonce.ok_or_else(|| XmppError::auth_failed("Challenge has no nonce"))?;
    let salt = salt.ok_or_else(|| XmppError::auth_failed("Challenge has no salt"))?;
    let iterations =
        iterations.ok_or_else(|| XmppError::auth_failed("Challenge has no iteration count"))?;

    if iterations < MIN_ITERATIONS {
        return Err(XmppError::auth_failed(format!(
            "Iteration count {} below the secure minimum {}",
            iterations, MIN_ITERATIONS
        )));
    }

    Ok(ScramChallenge {
        nonce,
        salt,
        iterations,
    })
}

/// Generate a random nonce string: random bytes, base64, filtered down to
/// alphanumeric characters.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LENGTH];
    rand::rng().fill(&mut bytes[..]);
    BASE64_STANDARD
        .encode(bytes)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(NONCE_LENGTH)
        .collect()
}

/// Hi() function from RFC 5802 - PBKDF2-HMAC-SHA1 sized to the hash output.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut output = vec![0u8; 20]; // SHA-1 output is 20 bytes
    pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut output);
    output
}

/// HMAC-SHA-1 helper.
fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// SHA-1 hash helper.
fn sha1_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Encode a SASL name (RFC 5802 escaping).
/// - `,` -> `=2C`
/// - `=` -> `=3D`
pub fn encode_sasl_name(name: &str) -> String {
    let mut result = String::new();
    for c in name.chars() {
        match c {
            ',' => result.push_str("=2C"),
            '=' => result.push_str("=3D"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const RFC_CHALLENGE: &str =
        "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";

    /// RFC 5802 Section 5 example exchange (user "user", password "pencil").
    #[test]
    fn test_rfc5802_known_vector() {
        let mut client = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());

        assert_eq!(
            client.initial_response(),
            BASE64_STANDARD.encode("n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL")
        );

        let client_final = client.handle_challenge(RFC_CHALLENGE).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        assert_eq!(
            client.server_signature(),
            Some("rmF9pqV8S7suAoZWja4dJRkFsKQ=")
        );
    }

    /// The derivation is deterministic for fixed inputs.
    #[test]
    fn test_derivation_is_deterministic() {
        let mut a = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        let mut b = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        assert_eq!(
            a.handle_challenge(RFC_CHALLENGE).unwrap(),
            b.handle_challenge(RFC_CHALLENGE).unwrap()
        );
        assert_eq!(a.server_signature(), b.server_signature());
    }

    #[test]
    fn test_success_verification() {
        let mut client = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        client.handle_challenge(RFC_CHALLENGE).unwrap();

        let good = BASE64_STANDARD.encode("v=rmF9pqV8S7suAoZWja4dJRkFsKQ=");
        assert!(client.verify_success_b64(&good).is_ok());

        let bad = BASE64_STANDARD.encode("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert!(client.verify_success_b64(&bad).is_err());
    }

    #[test]
    fn test_success_before_challenge_is_rejected() {
        let client = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        let payload = BASE64_STANDARD.encode("v=whatever");
        assert!(client.verify_success_b64(&payload).is_err());
    }

    /// An iteration count below 4096 is rejected before any key derivation.
    #[test]
    fn test_low_iteration_count_rejected() {
        let mut client = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        let challenge = "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=1000";
        let err = client.handle_challenge(challenge).unwrap_err();
        assert!(matches!(err, XmppError::Authentication(_)));
        assert!(client.server_signature().is_none());
    }

    /// An m= attribute is a fatal mandatory extension per RFC 5802.
    #[test]
    fn test_mandatory_extension_aborts() {
        let mut client = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        let challenge =
            "m=future,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
        assert!(client.handle_challenge(challenge).is_err());
    }

    /// Unknown single-letter keys are ignored, not negotiated.
    #[test]
    fn test_optional_extension_ignored() {
        let mut client = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        let challenge =
            "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096,x=ignored";
        assert!(client.handle_challenge(challenge).is_ok());
    }

    #[test]
    fn test_missing_attributes_rejected() {
        let mut client = ScramClient::with_nonce("user", "pencil", RFC_NONCE.to_string());
        assert!(client.handle_challenge("s=QSXCR+Q6sek8bf92,i=4096").is_err());
        assert!(client.handle_challenge("r=abc,i=4096").is_err());
        assert!(client.handle_challenge("r=abc,s=QSXCR+Q6sek8bf92").is_err());
    }

    #[test]
    fn test_nonce_generation() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!a.is_empty());
    }

    #[test]
    fn test_sasl_name_encoding() {
        assert_eq!(encode_sasl_name("user"), "user");
        assert_eq!(encode_sasl_name("user,name"), "user=2Cname");
        assert_eq!(encode_sasl_name("user=name"), "user=3Dname");
    }
}
