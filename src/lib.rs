pub mod cache;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod groups;
pub mod input;
pub mod interaction;
pub mod layout;
pub mod preview;
pub mod rendering;
pub mod sync;
pub mod transport;
pub mod tree;
pub mod types;
