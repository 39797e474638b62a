pub mod client;
pub mod codec;
pub mod decode;
pub mod discovery;
pub mod notify;
pub mod raw_codec;

pub use client::{Gen3Client, Gen3ClientOptions};
pub use decode::CircuitMetrics;
pub use discovery::{CircuitInfo, Topology};
