pub mod docker;
pub mod images;
pub mod manager;
pub mod runtime;
#[cfg(test)]
pub mod testing;
pub mod types;
