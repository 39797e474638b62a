//! Transport-agnostic client for residential electrical-panel monitoring and
//! control.
//!
//! Two transports are supported: a Gen2 REST API reachable behind
//! token-based auth ([`gen2::Gen2Client`]), and a Gen3 streaming gRPC-style
//! API with a schema-less wire format ([`gen3::Gen3Client`]). Both converge
//! on the same [`snapshot::PanelSnapshot`] model so application code can be
//! written once against either generation. [`factory::create_client`] picks
//! the right one, auto-detecting when the generation is unknown.
//!
//! The [`simulation`] module provides a deterministic panel-data generator
//! usable in place of either live transport for testing and demos.

pub mod behavior;
pub mod cache;
pub mod delay;
pub mod error;
pub mod factory;
pub mod gen2;
pub mod gen3;
pub mod phase;
pub mod retry;
pub mod simulation;
pub mod snapshot;

pub use error::{PanelError, Result};
pub use factory::{create_client, ClientOptions, PanelClient};
pub use gen2::{Gen2Client, Gen2ClientOptions};
pub use gen3::{Gen3Client, Gen3ClientOptions};
pub use snapshot::{CircuitSnapshot, PanelCapability, PanelGeneration, PanelSnapshot};
