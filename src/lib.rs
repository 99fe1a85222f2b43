//! truckfeed - simulated vehicle location feed
//!
//! Replays the route of a GeoJSON document as a paced stream of
//! `{"lon", "lat"}` events on a message broker topic.

pub mod bus;
pub mod config;
pub mod coordinates;
pub mod event;
pub mod publisher;
pub mod utils;

pub use bus::{BrokerClient, BusError, DeliveryOutcome};
pub use coordinates::{Coordinate, CoordinateSource, GeometryError};
pub use event::LocationEvent;
pub use publisher::{LocationPublisher, PublishError, PublishSummary};
