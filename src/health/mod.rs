//! Health Module
//!
//! Telemetry sampling for the swarm, decoupled from command dispatch.

mod sampler;

pub use sampler::{HealthEvent, HealthSampler, SamplerConfig, SamplerHandle};
