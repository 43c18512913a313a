//! Fibersync: fiber-blocking synchronization primitives with exactly-once
//! semantics.
//!
//! # Overview
//!
//! Fibersync provides the coordination substrate a structured-concurrency
//! runtime is built from: single-assignment result cells, finalizer scopes,
//! and blocking queues. Every primitive is written against the same two
//! rules. Completion happens exactly once, and cleanup runs exactly once, in
//! a known order, no matter which fiber wins a race.
//!
//! # Core Guarantees
//!
//! - **Exactly-once completion**: a [`Future`] resolves once; later attempts
//!   report `false` and change nothing
//! - **Exactly-once finalization**: a [`Scope`] runs each finalizer once, in
//!   reverse registration order, and a finalizer registered after close runs
//!   immediately
//! - **No lost wakeups**: parked fibers are resumed by the resolving fiber or
//!   interrupted at shutdown, never leaked
//! - **Cooperative interruption**: blocking operations observe interruption
//!   at checkpoints through the capability context [`Cx`], and report it as
//!   [`Interrupted`]
//! - **Panic isolation**: callbacks and finalizers that panic are captured as
//!   [`Defect`]s instead of unwinding into the caller
//!
//! # Module Structure
//!
//! - [`types`]: Core types (fiber identifiers, exits, failure causes)
//! - [`cx`]: Capability context carrying fiber identity and interruption
//! - [`future`]: Single-assignment result cells
//! - [`scope`]: Finalizer registration and exactly-once release
//! - [`queue`]: Fiber-blocking FIFO queues with overflow policies
//! - [`error`]: Error types
//! - [`test_utils`]: Shared test helpers
//!
//! # Example
//!
//! ```
//! use fibersync::{Cx, Queue};
//!
//! let cx = Cx::fresh();
//! let queue = Queue::make_bounded(4);
//! assert!(queue.offer(&cx, 1).unwrap());
//! assert_eq!(queue.take(&cx).unwrap(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cx;
pub mod error;
pub mod future;
pub mod queue;
pub mod scope;
pub mod test_utils;
pub mod tracing_compat;
pub mod types;

// Re-exports for convenient access to core types
pub use cx::Cx;
pub use error::Interrupted;
pub use future::{Future, WaiterKey};
pub use queue::Queue;
pub use scope::{ExecutionStrategy, FinalizerKey, ReleaseMap, Scope};
pub use types::{Cause, Defect, Exit, FiberId};
