//! Process manager: spawning, signalling and reaping OS processes.
//!
//! Each execution exclusively owns its [`spawner::SpawnedProcess`]; the
//! runner is the only task that waits on the child.

pub mod signals;
pub mod spawner;
