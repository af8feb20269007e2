pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod normalize;
pub mod queue;
pub mod scheduler;
pub mod scraper;
pub mod source;

#[cfg(test)]
pub mod testing;
