//! Proof Key for Code Exchange (RFC 7636), S256 only.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{AuthError, AuthResult};

pub const METHOD_S256: &str = "S256";
const VERIFIER_BYTES: usize = 32;

/// Verifier/challenge pair for a single authorization attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

impl fmt::Debug for PkceChallenge {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PkceChallenge")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}

/// Generate a fresh verifier from the OS random source and derive its
/// challenge.
pub fn generate() -> AuthResult<PkceChallenge> {
    let verifier = random_urlsafe(VERIFIER_BYTES)?;
    let challenge = challenge_for(&verifier);
    Ok(PkceChallenge {
        verifier,
        challenge,
        method: METHOD_S256,
    })
}

/// Whether `challenge` is the S256 challenge of `verifier`.
#[must_use]
pub fn validate(verifier: &str, challenge: &str) -> bool {
    challenge_for(verifier) == challenge
}

fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// `len` random bytes as unpadded URL-safe base64.
pub(crate) fn random_urlsafe(len: usize) -> AuthResult<String> {
    let mut bytes = vec![0_u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|error| AuthError::Entropy(error.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn verifier_is_43_unreserved_characters() {
        let pkce = generate().unwrap();
        assert_eq!(pkce.verifier.len(), 43);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(pkce.method, "S256");
    }

    #[test]
    fn challenge_validates_against_its_verifier() {
        let pkce = generate().unwrap();
        assert!(validate(&pkce.verifier, &pkce.challenge));
        assert!(!validate(&pkce.verifier, "not-the-challenge"));
        assert!(!pkce.challenge.contains('='));
    }

    #[test]
    fn matches_rfc7636_appendix_b() {
        assert!(validate(
            "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk",
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        ));
    }

    #[test]
    fn verifiers_do_not_repeat() {
        let verifiers: HashSet<_> = (0..10_000).map(|_| generate().unwrap().verifier).collect();
        assert_eq!(verifiers.len(), 10_000);
    }

    #[test]
    fn debug_hides_verifier() {
        let pkce = generate().unwrap();
        assert!(!format!("{pkce:?}").contains(&pkce.verifier));
    }
}
