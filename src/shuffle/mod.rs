//! Fisher-Yates shuffling, local and cross-server.

pub mod local;
pub mod parallel;
