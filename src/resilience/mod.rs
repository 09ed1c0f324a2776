//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Cache command:
//!     → retries.rs (deadline per attempt, fixed delay, transient-only retry)
//!     → caller degrades to a safe default once attempts run out
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - Worst-case latency is known up front: attempts × (timeout + delay)

pub mod retries;

pub use retries::RetryPolicy;
