pub mod config;
pub mod core;
pub mod models;
pub mod utils;

pub use crate::config::{PostUpdate, Settings};
pub use crate::core::collection::Collection;
pub use crate::core::context::AppContext;
pub use crate::models::error::SError;
