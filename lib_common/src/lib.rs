//! # lib_common
//!
//! Building blocks of the location identifier synchronizer. Every top-level
//! module sits behind the Cargo feature of the same name; `full` (the
//! default) enables all of them.

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "locations")]
pub mod locations;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;
