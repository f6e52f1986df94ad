pub mod advertisement;
pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod pipeline;
pub mod radio;
pub mod reading;
pub mod scanner;

#[cfg(test)]
mod testing;
