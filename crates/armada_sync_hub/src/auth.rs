//! Token-based authentication for hub connections.
//!
//! Tokens bind an origin identity to a timestamp and are signed with
//! HMAC-SHA256:
//!
//! - 16 bytes: origin ID
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total 56 bytes, hex-encoded for the `auth` wire message.

use crate::error::{HubError, HubResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 56;

/// Issues and validates origin tokens.
#[derive(Clone)]
pub struct TokenValidator {
    secret: Vec<u8>,
    token_expiry: Duration,
}

impl TokenValidator {
    /// Creates a validator with the given secret and expiry.
    pub fn new(secret: Vec<u8>, token_expiry: Duration) -> Self {
        Self {
            secret,
            token_expiry,
        }
    }

    /// Creates a hex-encoded token for an origin.
    pub fn create_token(&self, origin_id: Uuid) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut data = Vec::with_capacity(TOKEN_LEN);
        data.extend_from_slice(origin_id.as_bytes());
        data.extend_from_slice(&timestamp.to_be_bytes());

        let signature = self.sign(&data);
        data.extend_from_slice(&signature);
        hex::encode(data)
    }

    /// Validates a token and returns the origin it binds.
    pub fn validate(&self, token: &str) -> HubResult<Uuid> {
        let bytes = hex::decode(token)
            .map_err(|_| HubError::AuthRejected("token is not valid hex".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(HubError::AuthRejected("invalid token length".into()));
        }

        let origin_bytes: [u8; 16] = bytes[0..16]
            .try_into()
            .map_err(|_| HubError::AuthRejected("malformed origin".into()))?;
        let timestamp_bytes: [u8; 8] = bytes[16..24]
            .try_into()
            .map_err(|_| HubError::AuthRejected("malformed timestamp".into()))?;
        let signature = &bytes[24..56];

        let expected = self.sign(&bytes[0..24]);
        if signature != expected {
            return Err(HubError::AuthRejected("invalid signature".into()));
        }

        let timestamp = u64::from_be_bytes(timestamp_bytes);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if now > timestamp + self.token_expiry.as_millis() as u64 {
            return Err(HubError::AuthRejected("token expired".into()));
        }

        Ok(Uuid::from_bytes(origin_bytes))
    }

    fn sign(&self, data: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(
            b"test-secret-key-32-bytes-long!!".to_vec(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn create_and_validate() {
        let validator = validator();
        let origin = Uuid::new_v4();

        let token = validator.create_token(origin);
        assert_eq!(token.len(), TOKEN_LEN * 2);

        let validated = validator.validate(&token).unwrap();
        assert_eq!(validated, origin);
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let mut token = validator.create_token(Uuid::new_v4()).into_bytes();
        // Flip a nibble in the signature.
        token[100] = if token[100] == b'0' { b'1' } else { b'0' };
        let token = String::from_utf8(token).unwrap();

        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn reject_wrong_secret() {
        let issuing = validator();
        let checking = TokenValidator::new(b"other-secret".to_vec(), Duration::from_secs(60));

        let token = issuing.create_token(Uuid::new_v4());
        assert!(checking.validate(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = TokenValidator::new(b"secret".to_vec(), Duration::from_secs(0));
        let token = validator.create_token(Uuid::new_v4());

        std::thread::sleep(Duration::from_millis(10));
        let result = validator.validate(&token);
        assert!(matches!(result, Err(HubError::AuthRejected(_))));
    }

    #[test]
    fn reject_garbage() {
        let validator = validator();
        assert!(validator.validate("not hex at all").is_err());
        assert!(validator.validate("abcd").is_err());
    }
}
