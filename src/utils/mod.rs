// Shared utilities

mod env;

pub use env::*;
