//! Host agent library: discovers the services a node runs and classifies how
//! streaming and AI platforms see its network.
//!
//! Two independent engines share the same injected seams:
//! [`discovery::ServiceDiscovery`] turns processes, sockets, containers and
//! config files into [`discovery::DetectedService`] records, and
//! [`unlock::UnlockDetector`] probes each platform into a
//! [`unlock::StreamingResult`].

pub mod cli;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod network;
pub mod output;
pub mod protocol;
pub mod report;
pub mod testing;
pub mod unlock;

pub use config::AgentConfig;
pub use discovery::{DetectedService, ServiceDiscovery};
pub use error::{Error, Result};
pub use unlock::{Platform, StreamingResult, UnlockDetector};
