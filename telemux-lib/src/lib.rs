#![doc = include_str!("../README.md")]

mod error;

pub mod channel;
pub mod descriptor;
pub mod engine;
pub mod envelope;
pub mod record;
pub mod render;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
