use std::fmt::{self, Debug};

use busenv_model::Envelope;

use crate::error::Result;

/// A hook registered on a client and run around every message it handles.
///
/// Hooks run synchronously, in registration order, before the transport sees
/// the envelope (or after it hands one back). They must not block.
pub trait Plugin: Send + Sync + 'static {
    /// Unique name of the plugin within a client.
    fn name(&self) -> &str;

    /// Whether a failure in this plugin should be logged and skipped instead of
    /// aborting the operation.
    fn should_continue_on_error(&self) -> bool {
        false
    }

    /// Called with every outgoing envelope. Returning an error stops the send.
    fn before_send(&self, envelope: &mut Envelope) -> Result<()>;

    /// Called with every envelope received from the transport.
    fn after_receive(&self, _envelope: &mut Envelope) -> Result<()> {
        Ok(())
    }
}

/// A before-send plugin backed by a closure.
pub struct FnPlugin<F> {
    name: String,
    continue_on_error: bool,
    hook: F,
}

impl<F> FnPlugin<F> {
    pub fn new(name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&mut Envelope) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            continue_on_error: false,
            hook,
        }
    }

    /// Marks failures of this hook as non-fatal.
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

impl<F> Debug for FnPlugin<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPlugin")
            .field("name", &self.name)
            .field("continue_on_error", &self.continue_on_error)
            .finish_non_exhaustive()
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut Envelope) -> Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn should_continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    fn before_send(&self, envelope: &mut Envelope) -> Result<()> {
        (self.hook)(envelope)
    }
}
