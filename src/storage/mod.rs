mod db;

pub use db::{Database, StorageError};
