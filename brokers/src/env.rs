//! Environment stamping.
//!
//! [`EnvironmentStampingPlugin`] writes the name of the deployment environment
//! (for example `Development` or `Production`) into the [`ENV_PROPERTY_KEY`]
//! property of every outgoing message. Consumers can then route or filter on it
//! without looking at the body, e.g. with a subscription rule such as
//! `Env LIKE 'Development'`.

use std::sync::Arc;

use busenv_model::Envelope;

use crate::{error::Result, plugin::Plugin};

/// Property key the environment label is written to. Filters match on it
/// case-sensitively.
pub const ENV_PROPERTY_KEY: &str = "Env";

const PLUGIN_NAME: &str = "EnvironmentStampingPlugin";

/// Stamps a fixed environment label onto every outgoing envelope.
///
/// The label is taken verbatim: the empty string is a valid label. Any existing
/// [`ENV_PROPERTY_KEY`] property is overwritten. The body is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentStampingPlugin {
    environment: Arc<str>,
}

impl EnvironmentStampingPlugin {
    pub fn new(environment: impl Into<Arc<str>>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    /// The label this plugin stamps.
    pub fn environment(&self) -> &str {
        &self.environment
    }
}

impl Plugin for EnvironmentStampingPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn before_send(&self, envelope: &mut Envelope) -> Result<()> {
        envelope.set_property(ENV_PROPERTY_KEY, &*self.environment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use busenv_model::{Properties, PropertyValue};

    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PropertyValue::from(*v)))
            .collect()
    }

    #[test]
    fn stamps_empty_envelope() {
        let plugin = EnvironmentStampingPlugin::new("Development");
        let mut envelope = Envelope::empty();

        plugin.before_send(&mut envelope).unwrap();

        assert_eq!(envelope.properties, props(&[("Env", "Development")]));
        assert!(envelope.body.is_none());
    }

    #[test]
    fn overwrites_existing_stamp() {
        let plugin = EnvironmentStampingPlugin::new("Production");
        let mut envelope = Envelope::empty()
            .with_property("Env", "Staging")
            .with_property("Other", "x");

        plugin.before_send(&mut envelope).unwrap();

        assert_eq!(
            envelope.properties,
            props(&[("Env", "Production"), ("Other", "x")])
        );
    }

    #[test]
    fn stamps_empty_label_verbatim() {
        let plugin = EnvironmentStampingPlugin::new(String::new());
        let mut envelope = Envelope::new("Message 0");

        plugin.before_send(&mut envelope).unwrap();

        assert_eq!(envelope.property(ENV_PROPERTY_KEY), Some(&PropertyValue::from("")));
    }

    #[test]
    fn leaves_body_alone() {
        let plugin = EnvironmentStampingPlugin::new("Development");
        for body in [None, Some(Vec::new()), Some(b"Message 1".to_vec())].iter() {
            let mut envelope = Envelope {
                body: body.clone().map(Into::into),
                ..Default::default()
            };

            plugin.before_send(&mut envelope).unwrap();

            assert_eq!(envelope.body(), body.as_deref());
        }
    }

    #[test]
    fn stamping_is_idempotent() {
        let plugin = EnvironmentStampingPlugin::new("Development");
        let mut once = Envelope::new("Message 2").with_property("Other", 7i64);
        let mut twice = once.clone();

        plugin.before_send(&mut once).unwrap();
        plugin.before_send(&mut twice).unwrap();
        plugin.before_send(&mut twice).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn stamp_is_case_sensitive_string() {
        let plugin = EnvironmentStampingPlugin::new("development");
        let mut envelope = Envelope::empty();

        plugin.before_send(&mut envelope).unwrap();

        let stamp = envelope.property("Env").and_then(PropertyValue::as_str);
        assert_eq!(stamp, Some("development"));
        assert_ne!(stamp, Some("Development"));
        assert!(envelope.property("env").is_none());
    }

    #[test]
    fn receive_is_pass_through() {
        let plugin = EnvironmentStampingPlugin::new("Development");
        let mut envelope = Envelope::new("Message 3").with_property("Env", "Production");
        let before = envelope.clone();

        plugin.after_receive(&mut envelope).unwrap();

        assert_eq!(envelope, before);
    }

    #[test]
    fn exposes_name_and_label() {
        let plugin = EnvironmentStampingPlugin::new("Development");

        assert_eq!(plugin.name(), "EnvironmentStampingPlugin");
        assert_eq!(plugin.environment(), "Development");
        assert!(!plugin.should_continue_on_error());
    }
}
