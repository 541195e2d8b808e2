//! Application services layer.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod propagation;
pub mod repos;
