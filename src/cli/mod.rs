pub mod commands;
pub mod processor;

pub use commands::{parse_value, Command, CommandResult, ValueFormat};
pub use processor::CommandProcessor;
