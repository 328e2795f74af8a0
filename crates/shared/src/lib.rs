pub mod domain;
pub mod error;
pub mod protocol;
mod timestamp;
