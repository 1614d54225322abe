pub mod coordinator;
pub mod paper;
pub mod venue;

pub use coordinator::ExecutionCoordinator;
pub use venue::{Venue, VenueReceipt};
