//! Least-utilized routing across Chutes deployments.
//!
//! The core ([`cache`], [`fetcher`], [`response`], [`selector`]) picks the
//! deployment whose chute currently reports the lowest utilization, caching
//! readings for a short TTL. [`router`] and [`proxy`] host it behind a
//! pingora HTTP proxy.

pub mod cache;
pub mod config;
pub mod deployment;
pub mod error;
pub mod fetcher;
pub mod proxy;
pub mod response;
pub mod router;
pub mod selector;

pub use cache::{UtilizationCache, UtilizationReading};
pub use config::RoutingConfig;
pub use deployment::Deployment;
pub use selector::{
    create_chutes_routing_strategy, DeploymentSource, RoutingStrategy, UtilizationRouting,
};
