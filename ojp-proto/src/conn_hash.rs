//! Stable fingerprint identifying a logical datasource across the cluster.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// `connHash`: a stable fingerprint of `(url, username, password, key
/// connection properties)`. Two proxy nodes configured against the same
/// upstream datasource must compute the same `ConnHash` independently, so
/// the digest is content-addressed rather than process-local (ruling out
/// `DefaultHasher`, which is randomly seeded per process).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnHash(String);

impl ConnHash {
    /// `properties` should already be sorted by key for a stable digest;
    /// callers own that ordering since only they know which keys matter.
    pub fn compute(url: &str, username: &str, password: &str, properties: &[(String, String)]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update([0u8]);
        hasher.update(username.as_bytes());
        hasher.update([0u8]);
        hasher.update(password.as_bytes());
        for (k, v) in properties {
            hasher.update([0u8]);
            hasher.update(k.as_bytes());
            hasher.update([b'=']);
            hasher.update(v.as_bytes());
        }
        let digest = hasher.finalize();
        Self(hex(&digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_hash() {
        let a = ConnHash::compute("jdbc:pg://h/db", "u", "p", &[]);
        let b = ConnHash::compute("jdbc:pg://h/db", "u", "p", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_passwords_differ() {
        let a = ConnHash::compute("jdbc:pg://h/db", "u", "p1", &[]);
        let b = ConnHash::compute("jdbc:pg://h/db", "u", "p2", &[]);
        assert_ne!(a, b);
    }
}
