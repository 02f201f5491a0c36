use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Issues and checks bearer tokens of the form
/// `base64url(claims).base64url(hmac_sha256(secret, claims))`.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
        }
    }

    pub fn issue(&self, user_id: &str) -> String {
        self.issue_at(user_id, Utc::now())
    }

    /// Returns the user id the token was issued for, if the signature holds
    /// and it has not expired.
    pub fn verify(&self, token: &str) -> Option<String> {
        self.verify_at(token, Utc::now())
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).ok()
    }

    fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + self.ttl).timestamp(),
        };
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let signature = match self.mac() {
            Some(mut mac) => {
                mac.update(&payload);
                mac.finalize().into_bytes().to_vec()
            }
            None => Vec::new(),
        };
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let (payload_b64, signature_b64) = token.split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature).ok()?;

        let claims: Claims = serde_json::from_slice(&payload).ok()?;
        if claims.exp <= now.timestamp() {
            return None;
        }
        Some(claims.sub)
    }
}
