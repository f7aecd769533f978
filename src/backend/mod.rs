pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod mangadex;
pub mod navigator;
pub mod positions;
#[cfg(test)]
mod testing;
pub mod transport;
