pub mod collab;
pub mod config;
pub mod render;
pub mod service;
pub mod surface;
pub mod telemetry;
