pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
pub mod store;
