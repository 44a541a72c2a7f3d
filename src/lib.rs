//! Tracer MQTT Bridge library.
//!
//! Polls Tracer SC building controllers over their XML/HTTPS interface,
//! normalizes point values, synthesizes climate sets and publishes both to
//! an MQTT broker.

pub mod climate;
pub mod config;
pub mod controller;
pub mod error;
pub mod publish;
pub mod scheduler;
