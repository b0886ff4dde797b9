pub mod cli;
pub mod load_config;
pub mod manifest;

pub use cli::{run, Cli, Commands};
