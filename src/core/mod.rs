pub mod callbacks;
pub mod network;
pub mod retry;
pub mod single_flight;
pub mod transport;
