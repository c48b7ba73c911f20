//! Domain model module declarations.

pub mod chunk;
pub mod execution;
pub mod session;
