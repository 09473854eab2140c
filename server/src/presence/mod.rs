pub mod events;
pub mod hub;
pub mod registry;

pub use hub::{Flow, PresenceHub};
pub use registry::{Delivery, PresenceRegistry};
