//! Meeting lifecycle reconciliation.
//!
//! Consumes inbound provider events (session started/ended, transcript and
//! recording ready, chat messages), validates authenticity, and applies
//! idempotent state transitions. Also brokers on-demand agent connection
//! behind an advisory per-meeting lock.

pub mod connect;
pub mod connect_lock;
pub mod events;
pub mod reconciler;
pub mod signature;
pub mod status;

pub use connect::{ConnectOutcome, ConnectRequest};
pub use connect_lock::ConnectLockRegistry;
pub use events::CallEvent;
pub use reconciler::LifecycleReconciler;
pub use status::MeetingStatus;
