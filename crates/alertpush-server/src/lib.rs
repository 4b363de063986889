//! The alertpush HTTP service: configuration, receiver routing and the
//! Alertmanager webhook endpoint.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod registry;
pub mod state;
