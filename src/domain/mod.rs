//! Domain layer - accounts, call sessions and shared kernel

pub mod account;
pub mod session;
pub mod shared;
