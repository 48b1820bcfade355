//! Role passwords
//!
//! Passwords never reach a script or snapshot in clear text. Values that are
//! already an `md5…` or `SCRAM-SHA-256$…` verifier pass through unchanged;
//! anything else becomes the md5 verifier PostgreSQL expects:
//! `"md5" + md5(password + username)`.

use md5::{Digest, Md5};
use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of generated passwords
pub const GENERATED_LENGTH: usize = 24;

const MD5_PREFIX: &str = "md5";
const SCRAM_PREFIX: &str = "SCRAM-SHA-256$";

/// True for values PostgreSQL stores as given
pub fn is_hashed(value: &str) -> bool {
    let md5 = value
        .strip_prefix(MD5_PREFIX)
        .is_some_and(|hex| hex.len() == 32 && hex.bytes().all(|b| b.is_ascii_hexdigit()));
    md5 || value.starts_with(SCRAM_PREFIX)
}

/// The md5 verifier of `password` for `username`
pub fn md5(username: &str, password: &str) -> String {
    let digest = Md5::digest(format!("{password}{username}").as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{MD5_PREFIX}{hex}")
}

/// `password` as it may be written to disk
pub fn hashed(username: &str, password: &str) -> String {
    if is_hashed(password) {
        password.to_string()
    } else {
        md5(username, password)
    }
}

/// Random alphanumeric password
pub fn generate(length: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_salts_with_the_username() {
        assert_eq!(md5("alice", "secret"), "md54a0a68b43b6cd5cf266fa02f196e2371");
        assert_ne!(md5("bob", "secret"), md5("alice", "secret"));
    }

    #[test]
    fn verifiers_pass_through() {
        let verifier = "md5a2cc14bcc08bcb211f578153967abd6d";
        assert_eq!(hashed("alice", verifier), verifier);

        let scram = "SCRAM-SHA-256$4096:c2FsdA==$c3RvcmVk:c2VydmVy";
        assert_eq!(hashed("alice", scram), scram);
    }

    #[test]
    fn md5_lookalikes_are_hashed() {
        // A clear-text password that merely starts with "md5"
        assert!(!is_hashed("md5password"));
        assert_eq!(hashed("bob", "hunter2"), "md5a2cc14bcc08bcb211f578153967abd6d");
    }

    #[test]
    fn generated_passwords_are_alphanumeric() {
        let password = generate(GENERATED_LENGTH);
        assert_eq!(password.len(), GENERATED_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate(GENERATED_LENGTH));
    }
}
