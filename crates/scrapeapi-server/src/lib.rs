//! REST API server: routes, DTOs, configuration, telemetry and OpenAPI documentation.

pub mod config;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
