//! # switchboard-dispatch
//!
//! The executor boundary. An [`Executor`] streams [`DispatchEvent`]s for one
//! request; the [`Dispatcher`] drives it, forwards events in order, answers
//! gated actions through an [`Approver`], and folds the stream into a
//! [`DispatchOutcome`].
//!
//! The dispatcher keeps no session state. Callers that must not overlap turns
//! on one conversation serialise through [`SessionLocks`].

pub mod dispatcher;
pub mod event;
pub mod executor;
pub mod http;
pub mod locks;
pub mod mock;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use event::DispatchEvent;
pub use executor::{Approver, DispatchRequest, Executor};
pub use http::HttpExecutor;
pub use locks::SessionLocks;
