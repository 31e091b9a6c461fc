//! Pickup code generation and splitting.
//!
//! A full code is 12 uppercase alphanumerics. The lookup segment (first 6)
//! is the server-side cache/record key; the key segment (last 6) never
//! leaves the client and only feeds the wrapping-key KDF. `Display` and
//! `Debug` redact the key segment so it cannot leak through logs.

use rand::Rng;

use crate::error::RelayError;

/// Total length of a pickup code.
pub const CODE_LEN: usize = 12;

/// Length of the lookup segment (server-visible half).
pub const LOOKUP_LEN: usize = 6;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A complete 12-character pickup code.
#[derive(Clone, PartialEq, Eq)]
pub struct PickupCode(String);

impl PickupCode {
    /// Generate a fresh random code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        PickupCode(code)
    }

    /// Build a full code from a known lookup segment and a fresh key segment.
    pub fn with_lookup(lookup: &str) -> Result<Self, RelayError> {
        if !is_valid_segment(lookup) {
            return Err(RelayError::InvalidCode(format!(
                "lookup segment must be {LOOKUP_LEN} uppercase alphanumerics"
            )));
        }
        let mut rng = rand::thread_rng();
        let key: String = (0..CODE_LEN - LOOKUP_LEN)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        Ok(PickupCode(format!("{lookup}{key}")))
    }

    /// Parse a full code typed in by a receiver.
    pub fn parse(s: &str) -> Result<Self, RelayError> {
        if s.len() != CODE_LEN {
            return Err(RelayError::InvalidCode(format!(
                "expected {CODE_LEN} characters, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| CHARSET.contains(&b)) {
            return Err(RelayError::InvalidCode(
                "code must be uppercase letters and digits".into(),
            ));
        }
        Ok(PickupCode(s.to_string()))
    }

    /// The server-visible half, used as the cache/record key.
    pub fn lookup(&self) -> &str {
        &self.0[..LOOKUP_LEN]
    }

    /// The withheld half. Never send this to the server.
    pub fn key_segment(&self) -> &str {
        &self.0[LOOKUP_LEN..]
    }

    /// Full code, for handing to the other party.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PickupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}******", self.lookup())
    }
}

impl std::fmt::Debug for PickupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PickupCode")
            .field(&format!("{}******", self.lookup()))
            .finish()
    }
}

/// True if `s` is a well-formed 6-character lookup or key segment.
pub fn is_valid_segment(s: &str) -> bool {
    s.len() == LOOKUP_LEN && s.bytes().all(|b| CHARSET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_is_well_formed() {
        let code = PickupCode::generate();
        assert_eq!(code.as_str().len(), CODE_LEN);
        assert_eq!(code.lookup().len(), LOOKUP_LEN);
        assert_eq!(code.key_segment().len(), CODE_LEN - LOOKUP_LEN);
        assert!(is_valid_segment(code.lookup()));
        assert!(is_valid_segment(code.key_segment()));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(PickupCode::parse("ABC123").is_err());
        assert!(PickupCode::parse("ABC123DEF4567").is_err());
    }

    #[test]
    fn parse_rejects_lowercase() {
        assert!(PickupCode::parse("abc123def456").is_err());
    }

    #[test]
    fn parse_roundtrips_valid_code() {
        let code = PickupCode::parse("ABC123DEF456").unwrap();
        assert_eq!(code.lookup(), "ABC123");
        assert_eq!(code.key_segment(), "DEF456");
    }

    #[test]
    fn display_redacts_key_segment() {
        let code = PickupCode::parse("ABC123DEF456").unwrap();
        let shown = format!("{code}");
        assert!(shown.contains("ABC123"));
        assert!(!shown.contains("DEF456"));
        let debug = format!("{code:?}");
        assert!(!debug.contains("DEF456"));
    }

    #[test]
    fn with_lookup_keeps_prefix() {
        let code = PickupCode::with_lookup("QWE789").unwrap();
        assert_eq!(code.lookup(), "QWE789");
        assert!(is_valid_segment(code.key_segment()));
    }

    #[test]
    fn with_lookup_rejects_bad_prefix() {
        assert!(PickupCode::with_lookup("qwe789").is_err());
        assert!(PickupCode::with_lookup("TOOLONG7").is_err());
    }
}
