//! Core types shared by every layer of xdeps.
//!
//! Currently this is the error taxonomy: see [`XdepsError`] for the failure
//! modes a template evaluation can hit.

pub mod error;

pub use error::XdepsError;
