//! # switchboard-cron
//!
//! Scheduled jobs. Each job carries a message that is dispatched to the
//! executor on a fresh session when the job fires; the reply goes to the
//! job's channel target, or out as a `cron:result` broadcast.
//!
//! Three schedule kinds:
//! - **interval**: every `intervalMs` from scheduler start.
//! - **cron**: a five- or six-field expression, evaluated in local time.
//! - **once**: a single instant. A once job whose time passed while the
//!   gateway was down fires right after startup, then is removed.

pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod types;

pub use schedule::{next_fire, parse_cron, validate_schedule};
pub use scheduler::CronScheduler;
pub use store::{CronStore, FileStore, MemoryStore};
pub use types::{CronJob, CronSchedule, CronTarget, NewCronJob};
