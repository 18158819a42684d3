//! Narrow interfaces to the collaborators this service consumes but does not
//! own: the order service, courier profile persistence and session
//! verification.

pub mod couriers;
pub mod http;
pub mod orders;
pub mod sessions;

pub use couriers::{CourierProfileStore, InMemoryCourierStore};
pub use http::HttpOrderDirectory;
pub use orders::{AddressRecord, InMemoryDirectory, OrderDirectory, OrderRecord, RestaurantRecord};
pub use sessions::{Role, Session, SessionVerifier, StaticSessionVerifier};
