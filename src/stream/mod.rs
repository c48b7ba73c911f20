//! Stream multiplexer: deadlock-free draining of a child's output pipes.

pub mod decoder;
pub mod multiplexer;
