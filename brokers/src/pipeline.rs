use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use busenv_model::Envelope;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    plugin::Plugin,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    BeforeSend,
    AfterReceive,
}

/// An ordered list of plugins, run one after another for every envelope.
#[derive(Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Debug for PluginPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plugin. Names must be unique within a pipeline.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(Error::DuplicatePlugin(plugin.name().to_owned()));
        }

        debug!(plugin = plugin.name(), "registering plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Removes the plugin called `name`. Returns whether one was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.name() != name);
        before != self.plugins.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn run_before_send(&self, envelope: &mut Envelope) -> Result<()> {
        self.run(Stage::BeforeSend, envelope)
    }

    pub fn run_after_receive(&self, envelope: &mut Envelope) -> Result<()> {
        self.run(Stage::AfterReceive, envelope)
    }

    fn run(&self, stage: Stage, envelope: &mut Envelope) -> Result<()> {
        for plugin in &self.plugins {
            debug!(plugin = plugin.name(), ?stage, "running plugin");

            let result = match stage {
                Stage::BeforeSend => plugin.before_send(envelope),
                Stage::AfterReceive => plugin.after_receive(envelope),
            };

            match result {
                Ok(()) => (),
                Err(err) if plugin.should_continue_on_error() => {
                    warn!(plugin = plugin.name(), ?stage, error = %err, "plugin failed, continuing");
                }
                Err(err) => {
                    return Err(Error::Plugin {
                        plugin: plugin.name().to_owned(),
                        source: Box::new(err),
                    })
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::plugin::FnPlugin;

    fn recorder(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Plugin> {
        Arc::new(FnPlugin::new(name, move |_: &mut Envelope| {
            log.lock().unwrap().push(name);
            Ok(())
        }))
    }

    #[test]
    fn runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline.register(recorder("first", log.clone())).unwrap();
        pipeline.register(recorder("second", log.clone())).unwrap();
        pipeline.register(recorder("third", log.clone())).unwrap();

        pipeline.run_before_send(&mut Envelope::empty()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(pipeline.names(), vec!["first", "second", "third"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline.register(recorder("stamp", log.clone())).unwrap();

        let err = pipeline.register(recorder("stamp", log)).unwrap_err();

        assert!(matches!(err, Error::DuplicatePlugin(name) if name == "stamp"));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn unregister_removes_by_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline.register(recorder("stamp", log)).unwrap();

        assert!(pipeline.unregister("stamp"));
        assert!(!pipeline.unregister("stamp"));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn failing_plugin_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline
            .register(Arc::new(FnPlugin::new("reject", |_: &mut Envelope| {
                Err(Error::Hook("rejected".into()))
            })))
            .unwrap();
        pipeline.register(recorder("after", log.clone())).unwrap();

        let err = pipeline.run_before_send(&mut Envelope::empty()).unwrap_err();

        assert!(matches!(err, Error::Plugin { ref plugin, .. } if plugin == "reject"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn tolerant_plugin_failure_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline
            .register(Arc::new(
                FnPlugin::new("flaky", |_: &mut Envelope| Err(Error::Hook("flaky".into())))
                    .continue_on_error(),
            ))
            .unwrap();
        pipeline.register(recorder("after", log.clone())).unwrap();

        pipeline.run_before_send(&mut Envelope::empty()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn after_receive_uses_receive_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        pipeline.register(recorder("send-only", log.clone())).unwrap();

        pipeline.run_after_receive(&mut Envelope::empty()).unwrap();

        assert!(log.lock().unwrap().is_empty());
    }
}
