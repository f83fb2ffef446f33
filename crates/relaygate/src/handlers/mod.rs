//! HTTP request handlers.

mod health;
pub mod legacy;
pub mod problem_details;
pub mod v1;
mod version;

pub use health::{livez, readyz};
pub use version::version;
