// Session state
// Holds the credential pair and identity, optionally persisted across restarts

mod persistence;
mod store;
mod types;

pub use persistence::{SessionPersistence, SqlitePersistence};
pub use store::{Revocation, Rotation, SessionStore};
pub use types::{
    EndReason, GrantResponse, LoginRequest, RefreshRequest, Session, SessionEnded, TokenGrant,
};
