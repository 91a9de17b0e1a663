//! NGFW Congo - Behavioral Network Firewall Engine
//!
//! Real-time pipeline: packets are captured from a network interface,
//! aggregated into bidirectional flows, scored against an isolation
//! forest model at flow expiry, and anomalous sources are dropped at
//! the kernel firewall for a bounded lifetime.

pub mod blocker;
pub mod capture;
pub mod config;
pub mod decode;
pub mod events;
pub mod features;
pub mod firewall;
pub mod flow;
pub mod model;
pub mod pipeline;
pub mod stats;

pub use config::Config;
pub use pipeline::Engine;
