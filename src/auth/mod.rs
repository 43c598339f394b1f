//! Agent authentication
//!
//! Each agent carries two credentials. The password is kept only as an
//! argon2id PHC string and is consulted once per login; everything after
//! that rides on an opaque bearer token stored in the agents table. A
//! login mints a replacement token, so leaking one is survivable and the
//! token itself encodes nothing a client could pick apart.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use uuid::Uuid;

use crate::types::MashError;

/// Hash a signup password into an argon2id PHC string with a fresh salt
pub fn hash_password(password: &str) -> Result<String, MashError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| MashError::Internal(format!("password hash failed: {e}")))
}

/// Check a login attempt against the stored PHC string.
///
/// A hash that does not parse is an internal error, not a rejection; it
/// means the agents table holds something hash_password never produced.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, MashError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| MashError::Internal(format!("stored password hash unreadable: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Mint a fresh opaque bearer token (256 bits of v4 uuid as hex)
pub fn mint_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Extract the bearer token from an `Authorization` header value
pub fn extract_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{agents, now_ms, WorldDb};
    use crate::world::signup;

    #[test]
    fn signup_then_login_round_trip() {
        // the flow the auth routes drive: hash at signup, store on the
        // agent row, verify against the stored copy at login
        let db = WorldDb::open_in_memory().unwrap();
        let hash = hash_password("orbital-red-kettle-9").unwrap();
        let outcome = db
            .with_conn_mut(|conn| {
                signup::create_account(conn, "mira", &hash, &mint_token(), now_ms())
            })
            .unwrap();

        let stored = db
            .with_conn(|conn| {
                Ok(agents::get_agent(conn, &outcome.agent_id)?
                    .unwrap()
                    .password_hash)
            })
            .unwrap();
        assert!(verify_password("orbital-red-kettle-9", &stored).unwrap());
        assert!(!verify_password("orbital-red-kettle-0", &stored).unwrap());
    }

    #[test]
    fn hashes_are_salted_argon2id_strings() {
        let one = hash_password("the same secret").unwrap();
        let two = hash_password("the same secret").unwrap();
        assert!(one.starts_with("$argon2id$"));
        // a repeated password must not produce a repeated row value
        assert_ne!(one, two);
        assert!(verify_password("the same secret", &two).unwrap());
    }

    #[test]
    fn unreadable_stored_hash_is_an_error_not_a_rejection() {
        let result = verify_password("whatever", "plaintext-left-by-hand");
        assert!(result.is_err());
    }

    #[test]
    fn tokens_are_opaque_hex_and_distinct() {
        let token = mint_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, mint_token());
    }

    #[test]
    fn bearer_extraction_is_strict() {
        assert_eq!(extract_bearer("Bearer tok-123"), Some("tok-123"));
        assert_eq!(extract_bearer("bearer tok-123"), None);
        assert_eq!(extract_bearer("Basic tok-123"), None);
        assert_eq!(extract_bearer("Bearer    "), None);
    }
}
