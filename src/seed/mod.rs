pub mod scrum;

pub use scrum::*;
