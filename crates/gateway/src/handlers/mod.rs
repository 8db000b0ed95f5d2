//! API handlers module

pub mod artifacts;
pub mod chat;
pub mod health;
