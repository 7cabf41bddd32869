//! Multi-level referral commission and rank-qualification engine.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
