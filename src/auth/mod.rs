// Authentication module
// Attaches credentials, classifies failures, and recovers sessions with a single in-flight refresh

mod authenticator;
mod classifier;
mod coordinator;
mod identity;
mod terminator;

pub use authenticator::{authenticate, Credential};
pub use classifier::{FailureClassifier, Verdict};
pub use coordinator::RefreshCoordinator;
pub use identity::{HttpIdentityService, IdentityService};
pub use terminator::SessionTerminator;
