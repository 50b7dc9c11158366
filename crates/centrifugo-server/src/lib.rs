//! Centrifugo server runtime
//!
//! The node is the data plane of the server: it owns client and admin
//! connections, routes publications between the engine and local
//! subscribers, maintains presence and history per channel and exchanges
//! control messages with peer nodes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use centrifugo_server::{Config, Node, MemoryEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let node = Node::new(Config::default());
//!     let engine = Arc::new(MemoryEngine::new(node.clone()));
//!     node.set_engine(engine);
//!     node.run().await.unwrap();
//! }
//! ```

pub mod admin;
pub mod channel;
pub mod client;
pub mod config;
pub mod engine;
pub mod http;
pub mod hub;
pub mod node;
pub mod queue;

pub use admin::AdminClient;
pub use channel::ParsedChannel;
pub use client::{Client, Session};
pub use config::{ChannelOptions, Config, Namespace};
pub use engine::memory::MemoryEngine;
pub use engine::redis::{RedisEngine, RedisEngineConfig};
pub use engine::{Engine, EngineError};
pub use http::{HandlerFlags, MuxOptions};
pub use node::Node;
