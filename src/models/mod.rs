pub mod events;
pub mod participant;

pub use events::*;
pub use participant::*;
