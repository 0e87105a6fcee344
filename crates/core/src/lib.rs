#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod time;

pub use catalog::Catalog;
pub use error::{CatalogError, RecordError};
pub use scheduler::{SchedulingEngine, SelectionPolicy};
pub use time::Clock;
