#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod config;
pub mod error;
pub mod interactive;
pub mod model;
pub mod provider;
pub mod session;
pub mod storage;

pub use error::{Error, Result};
