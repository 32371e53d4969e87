#[cfg(feature = "amqp-broker")]
use lapin::Error as LapinError;
use std::{error::Error as StdError, result::Result as StdResult};
use thiserror::Error;

pub type Result<T, E = Error> = StdResult<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "amqp-broker")]
    #[error("Lapin error")]
    Lapin(#[from] LapinError),

    #[error("Plugin {plugin} failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("Plugin {0} is already registered")]
    DuplicatePlugin(String),

    #[error("Messaging entity {0} not found")]
    EntityNotFound(String),

    #[error("Messaging entity {0} already exists")]
    EntityExists(String),

    #[error("Invalid entity name {0}")]
    InvalidEntityName(String),

    #[error("Invalid filter expression: {0}")]
    InvalidFilter(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Header {key} cannot be carried: {reason}")]
    UnsupportedHeader { key: String, reason: String },
}
