//! Blocking client for TeraChem's TCPB protocol.
//!
//! TCPB drives quantum chemistry jobs on a remote server over one TCP
//! connection, exchanging length-prefixed protobuf frames:
//!
//! - `ipc` - Connection lifecycle and frame transport
//! - `proto` - Wire messages and the method/basis vocabulary
//! - `job` - Job specification with required-field tracking
//! - `client` - Async job protocol and one-call computations
//! - `models` - Endpoint and job results
//! - `config` - Client configuration (file, environment)
//! - `logging` - Tracing setup and the socket transcript
//!
//! # Example
//!
//! ```ignore
//! use tcpb::{Endpoint, TcpbClient};
//!
//! let mut client = TcpbClient::new(Endpoint::new("localhost", 11111)?);
//! client.connect()?;
//! // ... populate client.job_spec_mut() ...
//! let (energy, gradient) = client.compute_gradient(&geometry, false)?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod ipc;
pub mod job;
pub mod logging;
pub mod models;
pub mod proto;

pub use client::{CiOverlap, JobState, TcpbClient};
pub use config::ClientConfig;
pub use error::{Result, TcpbError};
pub use job::{JobSpec, RequiredField};
pub use models::{Endpoint, JobResult, StateEnergy};
pub use proto::{RunType, UnitType};
