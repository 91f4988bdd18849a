pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod maker;
pub mod netlist;
pub mod paths;
pub mod place;
pub mod plan;
pub mod route;

pub use error::{Error, Result};
