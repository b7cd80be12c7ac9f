//! Fleetform Core
//!
//! Compiles declarative container-cluster configurations into a CloudFormation
//! resource graph: network, load balancer, services, listeners and autoscaling

pub mod autoscaling;
pub mod cluster;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod listener;
pub mod load_balancer;
pub mod naming;
pub mod network;
pub mod resource;
pub mod service;
pub mod template;

pub use compiler::Compiler;
pub use config::ClusterSpec;
pub use context::CompileContext;
pub use error::{CompileError, CompileResult};
pub use template::Template;
