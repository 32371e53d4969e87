use std::sync::Arc;

use busenv_model::Envelope;
use nanoid::nanoid;
use tracing::{debug, instrument};

use crate::{error::Result, pipeline::PluginPipeline, plugin::Plugin, transport::Transport};

/// Sends envelopes to one entity (queue or topic), running every registered
/// plugin on each envelope first.
#[derive(Debug)]
pub struct SenderClient<T> {
    entity_path: String,
    transport: T,
    plugins: PluginPipeline,
}

impl<T> SenderClient<T>
where
    T: Transport,
{
    pub fn new(entity_path: impl Into<String>, transport: T) -> Self {
        Self {
            entity_path: entity_path.into(),
            transport,
            plugins: PluginPipeline::new(),
        }
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Registers a plugin to run before every send, after those already
    /// registered.
    pub fn register_plugin(&mut self, plugin: impl Plugin) -> Result<()> {
        self.plugins.register(Arc::new(plugin))
    }

    /// Registers a plugin instance shared with other clients.
    pub fn register_shared_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.plugins.register(plugin)
    }

    pub fn unregister_plugin(&mut self, name: &str) -> bool {
        self.plugins.unregister(name)
    }

    /// Names of the registered plugins, in the order they run.
    pub fn registered_plugins(&self) -> Vec<&str> {
        self.plugins.names()
    }

    /// Runs the plugins on `envelope` and hands it to the transport. If a
    /// plugin fails the transport is never called.
    #[instrument(level = "debug", skip(self, envelope), fields(entity = %self.entity_path), err)]
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let envelope = self.prepare(envelope)?;
        self.transport.send(&self.entity_path, envelope).await
    }

    /// Sends each envelope in order, stopping at the first failure. Plugins run
    /// on every envelope before any of them reaches the transport.
    #[instrument(level = "debug", skip(self, envelopes), fields(entity = %self.entity_path, count = envelopes.len()), err)]
    pub async fn send_batch(&self, envelopes: Vec<Envelope>) -> Result<()> {
        let prepared = envelopes
            .into_iter()
            .map(|envelope| self.prepare(envelope))
            .collect::<Result<Vec<_>>>()?;

        for envelope in prepared {
            self.transport.send(&self.entity_path, envelope).await?;
        }

        Ok(())
    }

    fn prepare(&self, mut envelope: Envelope) -> Result<Envelope> {
        if envelope.message_id.is_none() {
            envelope.message_id = Some(nanoid!());
        }

        self.plugins.run_before_send(&mut envelope)?;
        debug!(message_id = ?envelope.message_id, "envelope ready for transport");
        Ok(envelope)
    }
}

/// Receives envelopes from one entity (queue or subscription), running every
/// registered plugin's receive hook on each.
#[derive(Debug)]
pub struct ReceiverClient<T> {
    entity_path: String,
    transport: T,
    plugins: PluginPipeline,
}

impl<T> ReceiverClient<T>
where
    T: Transport,
{
    pub fn new(entity_path: impl Into<String>, transport: T) -> Self {
        Self {
            entity_path: entity_path.into(),
            transport,
            plugins: PluginPipeline::new(),
        }
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    pub fn register_plugin(&mut self, plugin: impl Plugin) -> Result<()> {
        self.plugins.register(Arc::new(plugin))
    }

    pub fn unregister_plugin(&mut self, name: &str) -> bool {
        self.plugins.unregister(name)
    }

    pub fn registered_plugins(&self) -> Vec<&str> {
        self.plugins.names()
    }

    /// Takes the next envelope, if one is waiting.
    #[instrument(level = "debug", skip(self), fields(entity = %self.entity_path), err)]
    pub async fn receive(&self) -> Result<Option<Envelope>> {
        match self.transport.receive(&self.entity_path).await? {
            Some(mut envelope) => {
                self.plugins.run_after_receive(&mut envelope)?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}
