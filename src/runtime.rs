pub mod admin;
pub mod alerts;
pub mod config;
pub mod runner;
pub mod telemetry;
