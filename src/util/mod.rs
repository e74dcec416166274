//! Small shared utilities.

pub mod clock;
