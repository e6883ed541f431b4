pub mod config;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod manifest;
pub mod output;
pub mod planner;
pub mod revlog;
pub mod roll;
pub mod roots;
pub mod stamp;
pub mod steps;

pub use error::{Error, Result};
