//! Client-side plugins for message buses.
//!
//! A [`SenderClient`] owns an ordered list of [`Plugin`]s and runs them on every
//! envelope before handing it to a [`Transport`]. The plugin this crate exists
//! for is [`EnvironmentStampingPlugin`], which tags outgoing messages with the
//! deployment environment so consumers can filter on it.

pub use busenv_model as model;

pub use client::{ReceiverClient, SenderClient};
pub use env::{EnvironmentStampingPlugin, ENV_PROPERTY_KEY};
pub use error::{Error, Result};
pub use memory::MemoryTransport;
pub use pipeline::PluginPipeline;
pub use plugin::{FnPlugin, Plugin};
pub use rule::{Filter, SqlFilter, SubscriptionRule};
pub use transport::Transport;

#[cfg(feature = "amqp-broker")]
pub mod amqp;
pub mod client;
pub mod env;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod plugin;
pub mod rule;
pub mod transport;
