//! infermesh: decentralized discovery of inference backends over NATS.
//!
//! A registry probes OpenAI-compatible backends, keeps a catalog of the
//! models they serve, and answers model requests on the bus. Consumers keep
//! a mirror of the models offered for their pattern.

pub mod bus;
pub mod cli;
pub mod client;
pub mod config;
pub mod consumer;
pub mod model;
pub mod registry;
