pub mod cli;
pub mod load_config;
pub mod shutdown;

pub use cli::{run, Cli, Commands};
