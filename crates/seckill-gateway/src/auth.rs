//! Verification of the per-user signature cookie
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use seckill_core::SignatureScheme;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The presented signature does not belong to the user
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("invalid user signature")]
pub struct AuthFailed;

/// The secret cannot key the configured signature scheme
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("cookie secret key is not usable with {0:?}")]
pub struct InvalidSecret(pub SignatureScheme);

/// Secret prepared for one scheme
#[derive(Clone)]
enum Key {
    /// Keyed once, cloned for every signature
    Hmac(HmacSha256),
    Md5(String),
}

/// Signs and verifies user ids with a server-side secret
#[derive(Clone)]
pub struct Authenticator {
    key: Key,
    scheme: SignatureScheme,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &format_args!("***"))
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl Authenticator {
    /// Create an authenticator
    pub fn new(secret: impl Into<String>, scheme: SignatureScheme) -> Result<Self, InvalidSecret> {
        let secret = secret.into();
        let key = match scheme {
            SignatureScheme::HmacSha256 => HmacSha256::new_from_slice(secret.as_bytes())
                .map(Key::Hmac)
                .map_err(|_| InvalidSecret(scheme))?,
            SignatureScheme::Md5 => Key::Md5(secret),
        };
        Ok(Self { key, scheme })
    }

    /// The signature scheme in use
    #[inline]
    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Compute the lower-case hex signature of `user_id`
    pub fn sign(&self, user_id: u64) -> String {
        match &self.key {
            Key::Hmac(mac) => {
                let mut mac = mac.clone();
                mac.update(user_id.to_string().as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            Key::Md5(secret) => hex::encode(Md5::digest(format!("{user_id}:{secret}").as_bytes())),
        }
    }

    /// Check `presented` against the signature of `user_id`
    ///
    /// The comparison takes the same time for every presented signature of
    /// the expected length.
    pub fn verify(&self, user_id: u64, presented: &str) -> Result<(), AuthFailed> {
        let expected = self.sign(user_id);
        if expected.len() != presented.len() {
            return Err(AuthFailed);
        }
        if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(())
        } else {
            Err(AuthFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_legacy_signatures() {
        let auth = Authenticator::new("S", SignatureScheme::Md5).unwrap();
        // md5("7:S")
        let expected = "0c1a54d1459c18f847ef083b3c947493";
        assert_eq!(auth.sign(7), expected);
        assert!(auth.verify(7, expected).is_ok());
    }

    #[test]
    fn hmac_is_the_default() {
        let auth = Authenticator::new("S", SignatureScheme::default()).unwrap();
        assert_eq!(auth.scheme(), SignatureScheme::HmacSha256);
        let sign = auth.sign(7);
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(auth.verify(7, &sign).is_ok());
        assert_ne!(sign, Authenticator::new("T", SignatureScheme::HmacSha256).unwrap().sign(7));
    }

    #[test]
    fn round_trip_over_users_and_secrets() {
        for scheme in [SignatureScheme::HmacSha256, SignatureScheme::Md5] {
            for secret in ["S", "tyP87zZKzITuzaUjhmbqhNIDnyg6f4KP", "ünïcødé", ""] {
                let auth = Authenticator::new(secret, scheme).unwrap();
                for user_id in [0, 1, 7, 42, 1_000_000, u64::MAX] {
                    let sign = auth.sign(user_id);
                    assert!(auth.verify(user_id, &sign).is_ok());
                    assert_eq!(auth.verify(user_id.wrapping_add(1), &sign), Err(AuthFailed));
                }
            }
        }
    }

    #[test]
    fn any_single_bit_flip_is_rejected() {
        for scheme in [SignatureScheme::HmacSha256, SignatureScheme::Md5] {
            let auth = Authenticator::new("S", scheme).unwrap();
            let sign = auth.sign(7).into_bytes();
            for i in 0..sign.len() {
                for bit in 0..8 {
                    let mut altered = sign.clone();
                    altered[i] ^= 1 << bit;
                    let Ok(altered) = String::from_utf8(altered) else {
                        continue;
                    };
                    assert_eq!(auth.verify(7, &altered), Err(AuthFailed));
                }
            }
        }
    }

    #[test]
    fn wrong_length_and_case_are_rejected() {
        let auth = Authenticator::new("S", SignatureScheme::Md5).unwrap();
        let sign = auth.sign(7);
        assert_eq!(auth.verify(7, "deadbeef"), Err(AuthFailed));
        assert_eq!(auth.verify(7, ""), Err(AuthFailed));
        assert_eq!(auth.verify(7, &format!("{sign}0")), Err(AuthFailed));
        if sign.chars().any(|c| c.is_ascii_alphabetic()) {
            assert_eq!(auth.verify(7, &sign.to_ascii_uppercase()), Err(AuthFailed));
        }
    }

    #[test]
    fn prepared_key_signs_repeatably() {
        let long = "k".repeat(200);
        for secret in ["", "S", long.as_str()] {
            let auth = Authenticator::new(secret, SignatureScheme::HmacSha256).unwrap();
            let first = auth.sign(7);
            assert_eq!(auth.sign(8).len(), 64);
            assert_eq!(auth.sign(7), first);
            assert_eq!(auth.clone().sign(7), first);
        }
    }

    #[test]
    fn debug_hides_the_secret() {
        for scheme in [SignatureScheme::HmacSha256, SignatureScheme::Md5] {
            let auth = Authenticator::new("hunter2", scheme).unwrap();
            assert!(!format!("{auth:?}").contains("hunter2"));
        }
    }
}
