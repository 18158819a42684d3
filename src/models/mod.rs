pub mod courier;
pub mod delivery;
pub mod events;
pub mod messages;

pub use courier::{CourierProfile, CourierStatus, GeoPoint};
pub use delivery::{Delivery, DeliveryStatus, Location, PaymentMethod, Transition};
