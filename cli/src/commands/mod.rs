//! Subcommand implementations

pub mod cat;
pub mod dump;
pub mod extract;
pub mod files;
pub mod info;
pub mod ring_bench;
