pub mod checkpoint;
pub mod db;
pub mod lease;
