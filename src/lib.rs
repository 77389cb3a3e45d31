//! Loopback HTTP bridge into a single-threaded host application.
//!
//! Request handlers run on their own threads and never touch the host. They
//! queue closures that the host runs on its own tick via [`Bridge::tick`].

pub mod config;
pub mod error;
pub mod exec;
pub mod graph;
pub mod host;
pub mod inspect;
pub mod lifecycle;
pub mod queue;
pub mod scene;
pub mod server;
pub mod store;
pub mod token;

pub use config::BridgeConfig;
pub use error::{BridgeError, ReadError, StoreError, WaitError};
pub use host::Host;
pub use lifecycle::Bridge;
pub use queue::TaskQueue;
pub use token::Token;
