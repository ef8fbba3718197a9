use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

/// Number of hex characters in a session key (128 bits).
pub const SESSION_KEY_LEN: usize = 32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("session key must be {SESSION_KEY_LEN} characters, got {0}")]
    InvalidLength(usize),

    #[error("session key contains a non-hex character at position {0}")]
    InvalidCharacter(usize),
}

/// An opaque session identifier: 32 lowercase hex characters.
///
/// Keys coming from clients must go through [`FromStr`], which rejects anything
/// that could not have been produced by [`KeyGenerator`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SESSION_KEY_LEN {
            return Err(ParseError::InvalidLength(s.len()));
        }

        if let Some(pos) = s
            .bytes()
            .position(|b| !matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(ParseError::InvalidCharacter(pos));
        }

        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for SessionKey {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionKey> for String {
    fn from(value: SessionKey) -> Self {
        value.0
    }
}

/// Produces fresh session keys.
///
/// Each key is a SHA-256 digest over OS-seeded randomness, the process id, the
/// current time in nanoseconds and a server-side secret, truncated to 128 bits.
#[derive(Clone)]
pub struct KeyGenerator {
    secret: Arc<[u8]>,
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

impl KeyGenerator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn generate(&self) -> SessionKey {
        let mut entropy = [0u8; 32];
        if OsRng.try_fill_bytes(&mut entropy).is_err() {
            // the thread rng is itself seeded from the OS
            entropy = rand::random();
        }
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();

        let mut hasher = Sha256::new();
        hasher.update(entropy);
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(&self.secret);
        let digest = hasher.finalize();

        SessionKey(hex::encode(&digest[..SESSION_KEY_LEN / 2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_keys_are_well_formed() {
        let keys = KeyGenerator::new("secret");
        let key = keys.generate();

        assert_eq!(key.as_str().len(), SESSION_KEY_LEN);
        assert_eq!(key.as_str().parse::<SessionKey>().unwrap(), key);
    }

    #[test]
    fn generated_keys_do_not_repeat() {
        let keys = KeyGenerator::new("secret");
        let seen: HashSet<SessionKey> = (0..10_000).map(|_| keys.generate()).collect();
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn rejects_suspicious_input() {
        assert_eq!(
            "abc".parse::<SessionKey>(),
            Err(ParseError::InvalidLength(3))
        );
        assert_eq!(
            "0123456789abcdef0123456789ABCDEF".parse::<SessionKey>(),
            Err(ParseError::InvalidCharacter(26))
        );
        assert!(
            "../../etc/passwd0123456789abcdef"
                .parse::<SessionKey>()
                .is_err()
        );
    }

    #[test]
    fn serde_validates_keys() {
        let key = KeyGenerator::new("secret").generate();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(serde_json::from_str::<SessionKey>(&json).unwrap(), key);
        assert!(serde_json::from_str::<SessionKey>("\"nope\"").is_err());
    }
}
