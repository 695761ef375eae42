pub mod coordinator;
pub mod cycle;
pub mod health;
pub mod retry;
pub mod watchdog;
