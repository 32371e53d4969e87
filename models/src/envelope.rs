use bytes::Bytes;

use crate::property::{Properties, PropertyValue};

/// The unit of transmission on the bus: an optional opaque body plus a bag of
/// application properties.
///
/// A missing body and an empty body are distinct and both are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier assigned by the sender. Clients fill this in when it is absent.
    pub message_id: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    /// Application-specific label, analogous to a subject line.
    pub label: Option<String>,
    pub body: Option<Bytes>,
    /// Application properties. These are what subscription rules match on.
    #[serde(default)]
    pub properties: Properties,
}

impl Envelope {
    /// Creates an envelope carrying `body` and no properties.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Creates an envelope with no body at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets a property, returning the value it replaced.
    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_envelope_has_no_body() {
        let envelope = Envelope::empty();
        assert!(envelope.body().is_none());
        assert!(envelope.properties.is_empty());
    }

    #[test]
    fn set_property_returns_previous_value() {
        let mut envelope = Envelope::new("Message 0").with_property("Env", "Staging");
        let previous = envelope.set_property("Env", "Production");

        assert_eq!(previous, Some(PropertyValue::from("Staging")));
        assert_eq!(envelope.property("Env").and_then(PropertyValue::as_str), Some("Production"));
        assert_eq!(envelope.body(), Some(&b"Message 0"[..]));
    }

    #[test]
    fn empty_body_differs_from_missing_body() {
        assert_ne!(Envelope::new(Vec::<u8>::new()), Envelope::empty());
    }
}
