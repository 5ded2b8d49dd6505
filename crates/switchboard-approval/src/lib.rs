//! # switchboard-approval
//!
//! Gates sensitive executor actions behind a human decision. One
//! [`ApprovalBridge`] exists per client connection; every request resolves
//! exactly once, to the human's answer or to the policy default on timeout.

pub mod bridge;

pub use bridge::{ApprovalBridge, ApprovalOutcome, ApprovalPolicy, ApprovalReply};
