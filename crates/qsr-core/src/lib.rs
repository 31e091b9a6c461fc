//! qsr-core: types shared between the relay server and the transfer client.
//!
//! A pickup code is 12 uppercase alphanumerics. The first 6 characters (the
//! lookup segment) are the only part a client ever sends over the wire; the
//! last 6 (the key segment) stay on the client and feed the wrapping-key
//! KDF. Everything the server stores is addressed by the lookup segment and
//! tagged with an owning user and an absolute expiry.

pub mod code;
pub mod config;
pub mod error;
pub mod types;

pub use code::{PickupCode, CODE_LEN, LOOKUP_LEN};
pub use error::{RelayError, RelayResult};

/// Usage limit value meaning "unlimited downloads".
pub const UNLIMITED_USES: u32 = 999;
