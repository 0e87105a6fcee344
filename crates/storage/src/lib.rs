#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    FactRecordRepository, InMemoryRepository, Storage, StorageError, TrainingRunRepository,
};
