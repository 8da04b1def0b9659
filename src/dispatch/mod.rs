pub mod action_selector;
pub mod conventions;
pub mod handler;
pub mod operation;
pub mod registry;
pub mod resource_path;
pub mod standard_handler;

pub use action_selector::*;
pub use conventions::*;
pub use handler::*;
pub use operation::*;
pub use registry::*;
pub use resource_path::*;
pub use standard_handler::*;
