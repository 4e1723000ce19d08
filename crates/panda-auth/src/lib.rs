//! Session store and identity-provider sign-in for the panda client.
//!
//! The [`session::SessionStore`] is the single source of truth for the current
//! identity. It wraps an [`client::IdentityClient`] and republishes every
//! identity change to its subscribers.

pub mod client;
pub mod completion;
pub mod config;
pub mod derived;
pub mod identity;
pub mod interrupt;
pub mod logging;
pub mod provider;
pub mod session;
pub mod store;
pub mod window;

pub use client::{IdentityClient, LoginCallbacks, LoginRequest};
pub use derived::{Derived, derive_from_identity};
pub use identity::{DelegatedIdentity, Identity, Principal};
pub use session::{Session, SessionStore, SignInError, SignInParams};
pub use store::{Readable, Subscription, Writable};
