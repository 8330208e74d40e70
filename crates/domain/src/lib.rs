pub mod config;
pub mod error;
pub mod store;
pub mod stream;
pub mod tool;
pub mod trace;
pub mod turn;
