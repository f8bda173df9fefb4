//! Handshake signatures shared with the lobby service.
//!
//! The legacy scheme appends the shared secret to the concatenated fields
//! and hex-encodes an MD5 digest of the result. `HmacSha256` keys an
//! HMAC-SHA256 with the secret over the same concatenation instead, for
//! deployments that do not need to interoperate with an existing signer.

use std::str::FromStr;

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignScheme {
    Md5Suffix,
    HmacSha256,
}

impl FromStr for SignScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" | "md5-suffix" => Ok(Self::Md5Suffix),
            "hmac" | "hmac-sha256" => Ok(Self::HmacSha256),
            other => Err(format!("unknown sign scheme: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Signer {
    scheme: SignScheme,
    secret: String,
}

impl Signer {
    pub fn new(scheme: SignScheme, secret: impl Into<String>) -> Self {
        Self { scheme, secret: secret.into() }
    }

    /// Sign `parts` in order; the secret always goes last.
    pub fn sign(&self, parts: &[&str]) -> String {
        match self.scheme {
            SignScheme::Md5Suffix => {
                let mut hasher = Md5::new();
                for p in parts {
                    hasher.update(p.as_bytes());
                }
                hasher.update(self.secret.as_bytes());
                hex::encode(hasher.finalize())
            }
            SignScheme::HmacSha256 => {
                // HMAC accepts keys of any length.
                let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
                    return String::new();
                };
                for p in parts {
                    mac.update(p.as_bytes());
                }
                hex::encode(mac.finalize().into_bytes())
            }
        }
    }

    pub fn verify(&self, signature: &str, parts: &[&str]) -> bool {
        !signature.is_empty() && signature.eq_ignore_ascii_case(&self.sign(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_suffix_matches_legacy_signer() {
        // md5("1001" + "r1" + "{}" + "secret")
        let signer = Signer::new(SignScheme::Md5Suffix, "secret");
        let expected = hex::encode(Md5::digest(b"1001r1{}secret"));
        assert_eq!(signer.sign(&["1001", "r1", "{}"]), expected);
        assert!(signer.verify(&expected, &["1001", "r1", "{}"]));
    }

    #[test]
    fn field_order_matters() {
        let signer = Signer::new(SignScheme::HmacSha256, "k");
        let sig = signer.sign(&["a", "b"]);
        assert!(signer.verify(&sig, &["a", "b"]));
        assert!(!signer.verify(&sig, &["b", "a"]));
        assert!(!signer.verify("", &["a", "b"]));
    }

    #[test]
    fn parses_scheme_names() {
        assert_eq!("md5".parse::<SignScheme>(), Ok(SignScheme::Md5Suffix));
        assert_eq!("HMAC-SHA256".parse::<SignScheme>(), Ok(SignScheme::HmacSha256));
        assert!("rot13".parse::<SignScheme>().is_err());
    }
}
