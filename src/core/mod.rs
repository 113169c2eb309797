//! Core domain models
//!
//! Nodes, commands, steps, join tokens, run state and the cluster
//! configuration they are built from.

pub mod command;
pub mod config;
pub mod node;
pub mod state;
pub mod step;
pub mod token;

pub use command::RemoteCommand;
pub use node::{Credentials, Node, NodeRole, Secret};
pub use state::*;
pub use step::*;
pub use token::{JoinToken, TokenError};
