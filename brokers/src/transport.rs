use std::sync::Arc;

use async_trait::async_trait;
use busenv_model::Envelope;

use crate::error::Result;

/// The wire-level side of a client: whatever actually moves envelopes to and
/// from the bus. Plugins have already run by the time `send` is called.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, entity_path: &str, envelope: Envelope) -> Result<()>;

    /// Takes the next envelope waiting on `entity_path`, if any.
    async fn receive(&self, entity_path: &str) -> Result<Option<Envelope>>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(&self, entity_path: &str, envelope: Envelope) -> Result<()> {
        (**self).send(entity_path, envelope).await
    }

    async fn receive(&self, entity_path: &str) -> Result<Option<Envelope>> {
        (**self).receive(entity_path).await
    }
}
