pub mod batch;
pub mod handlers;
pub mod routes;
pub mod state;

pub use batch::*;
pub use handlers::*;
pub use routes::*;
pub use state::*;
