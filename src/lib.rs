pub mod api;
pub mod config;
pub mod controller;
pub mod data;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod lifecycle;
pub mod ml;
pub mod registry;
pub mod telemetry;
