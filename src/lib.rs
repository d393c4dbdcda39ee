// vidhash - video fingerprint evaluation library

pub mod constants;
pub mod error;
pub mod tools;
pub mod db;
pub mod metadata;
pub mod hashing;
pub mod evaluate;
pub mod transcode;

pub use error::{Result, VidHashError};
