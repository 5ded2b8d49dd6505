//! # switchboard-core
//!
//! Core types and primitives for the Switchboard gateway.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: the unified error type, the channel context that travels with a
//! request, and the broadcast sink every component fans events into.

pub mod error;
pub mod event;
pub mod types;

pub use error::{Result, SwitchboardError};
pub use event::{EventBus, EventSink, GatewayEvent};
pub use types::*;
