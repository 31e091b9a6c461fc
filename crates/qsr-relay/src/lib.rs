//! qsr-relay: server side of the pickup-code relay.
//!
//! The relay is an untrusted drop box. It holds three kinds of opaque
//! artifacts per transfer, all TTL-bounded and all in memory:
//!
//!   - encrypted chunks, keyed by `(owner, file, index)`
//!   - serialized file metadata, keyed by `(owner, file)`
//!   - the wrapped content key, keyed by `(owner, lookup)`
//!
//! Chunks and metadata belong to a *file* so that several pickup codes can
//! share one uploaded chunk set (content dedup). The wrapped key belongs to
//! a *code*: each code carries its own key segment, so the sender wraps the
//! content key once per code.
//!
//! [`RelayStore`] is the byte cache, [`PickupCodeRegistry`] the code state
//! machine, [`RelayService`] glues them into the operations the HTTP layer
//! and the client orchestrators call.

pub mod cleanup;
pub mod http;
pub mod registry;
pub mod service;
pub mod store;

pub use cleanup::CleanupScheduler;
pub use registry::PickupCodeRegistry;
pub use service::RelayService;
pub use store::RelayStore;
