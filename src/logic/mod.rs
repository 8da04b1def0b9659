pub mod container_builder;
pub mod locator;

pub use container_builder::*;
pub use locator::*;
