//! HTTP handlers: the utility routes and the per-endpoint dispatch pipeline.

pub mod dispatch;
pub mod health;

pub use dispatch::DispatchHandler;
pub use health::{healthcheck, version};
