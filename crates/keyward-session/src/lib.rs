//! Session state for keyward.
//!
//! This crate holds the one piece of shared mutable state in the system,
//! the live [`Session`], and the component that judges whether its token is
//! still good.
//!
//! - [`SessionStore`] owns the session slot and its durable
//!   [`SessionMirror`]. Writes are compare-and-set on the session
//!   [`Generation`](keyward_protocol::Generation).
//! - [`SessionReader`] is the read-only view handed to everything else.
//! - [`TokenValidator`] asks the identity provider for a forced,
//!   non-cached token check and turns the answer into a
//!   [`ValidationResult`].

mod error;
mod mirror;
mod session;
mod store;
mod validator;

pub use error::{AuthError, CredentialProblem, MirrorError};
pub use mirror::{FileMirror, MemoryMirror, SessionMirror};
pub use session::{PersistedSession, Session, SessionDraft};
pub use store::{SessionReader, SessionSlot, SessionStore};
pub use validator::{TokenValidator, ValidationResult};
