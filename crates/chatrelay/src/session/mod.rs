//! Session lifecycle.
//!
//! Each session runs as an actor ([`actor::SessionActor`]) reached through a
//! [`SessionHandle`]. The [`SessionRegistry`] keeps one handle per name, and
//! the [`SessionController`] is the entry point for the control surface.

mod actor;
mod actor_types;
mod controller;
mod error;
mod handle;
mod pairing;
mod registry;
mod state;

pub use actor_types::PairingUpdate;
pub use controller::{ControllerDeps, RestoreReport, SessionController};
pub use error::{MAX_SESSION_NAME_LEN, SessionError, validate_session_name};
pub use handle::SessionHandle;
pub use pairing::PairingTimeoutGuard;
pub use registry::{SessionRegistry, SessionSummary};
pub use state::SessionState;
