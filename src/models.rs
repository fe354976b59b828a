pub mod error;
pub mod events;
pub mod loader;
pub mod remote;
