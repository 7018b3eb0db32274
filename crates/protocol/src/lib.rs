//! AgentRelay Protocol
//!
//! Shared types for communication between the AgentRelay client and the
//! agent session backend. Frames are serialized as JSON over WebSocket;
//! REST payloads reuse the same types.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod rest;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use server::{OutputPayload, ServerFrame};
pub use types::*;

/// Prefix for ids minted on the client before the backend confirms one.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a client-side id (see [`LOCAL_ID_PREFIX`]).
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4())
}

/// True for ids produced by [`new_local_id`].
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_recognized() {
        let id = new_local_id();
        assert!(is_local_id(&id));
        assert!(!is_local_id(&new_id()));
        assert!(!is_local_id("msg_01H"));
    }
}
