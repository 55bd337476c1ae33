pub mod chat;
pub mod client;
pub mod config;

pub use chat::*;
pub use client::*;
pub use config::*;
