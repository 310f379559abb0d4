pub mod cli;
pub mod common;
pub mod installer;
pub mod progress;
