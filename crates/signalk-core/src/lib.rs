//! # signalk-core
//!
//! Core SignalK data model and publisher configuration.
//!
//! This crate provides:
//! - Data model types (Delta, Update, RawUpdate, Entry, etc.)
//! - Path parsing, topic level rewriting and wildcard matching
//! - Publisher options, broker URL parsing and vessel identity
//! - Subscription filter and event types
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod config;
pub mod model;
pub mod path;
pub mod subscription;

pub use config::{
    BrokerScheme, BrokerUrl, ConfigError, Identity, IdentitySource, PublisherOptions, VesselInfo,
};
pub use model::*;
pub use path::{Path, PathPattern};
pub use subscription::{SubscriptionEvent, SubscriptionFilter};
