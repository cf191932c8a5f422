//! Process launching for the castoff core library
//!
//! Children are started in their own session under a fixed identity and can
//! be released so they outlive the launcher without being waited on.
//!
//! ## Platform Support
//!
//! - **Unix**: sessions via `setsid()`, credentials via `setgid`/`setuid`
//!
//! ## Ownership
//!
//! - The OS owns the process; a launcher only holds a reference to it
//! - The caller owns the standard stream descriptors; a launcher only borrows them

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
