#[cfg(test)]
pub mod memory;
pub mod sqlite;
pub mod state;
pub mod store;
pub mod submission;
pub mod types;
