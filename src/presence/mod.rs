pub mod aggregator;
pub mod room_id;
pub mod session;
pub mod tracker;
pub mod transport;
