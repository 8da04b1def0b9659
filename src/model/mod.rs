pub mod common;
pub mod container;
pub mod entity;
pub mod entity_set;
pub mod entity_type;
pub mod native;
pub mod wire;

pub use common::*;
pub use container::*;
pub use entity::*;
pub use entity_set::*;
pub use entity_type::*;
pub use native::*;
pub use wire::*;
