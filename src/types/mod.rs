//! Core value types shared by every primitive in the crate.
//!
//! - [`FiberId`]: identity of a lightweight cooperative task
//! - [`Exit`]: the terminal outcome of a computation
//! - [`Cause`]: a composable failure tree (errors, defects, interruptions)
//! - [`Defect`]: a programmer-error payload, usually a caught panic

mod cause;
mod exit;
mod id;

pub use cause::{Cause, Defect};
pub use exit::Exit;
pub use id::FiberId;
