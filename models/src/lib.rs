//! Data types for messages travelling through a busenv client.

#[macro_use]
extern crate serde_derive;

pub use envelope::Envelope;
pub use property::{Properties, PropertyValue};

pub mod envelope;
pub mod property;
