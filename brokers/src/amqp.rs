use std::convert::TryFrom;

use async_trait::async_trait;
use busenv_model::{Envelope, Properties, PropertyValue};
use chrono::{TimeZone, Utc};
use lapin::{
    options::{BasicAckOptions, BasicGetOptions, BasicPublishOptions, BasicRejectOptions},
    types::{AMQPValue, DecimalValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use tracing::{debug, instrument, warn};

use crate::{
    error::{Error, Result},
    transport::Transport,
};

pub type AmqpProperties = BasicProperties;

/// Sends envelopes through an already-open AMQP channel.
///
/// Envelopes are published to `exchange` with the entity path as routing key,
/// and received with `basic_get` from the queue named by the entity path.
/// Properties travel as message headers.
#[derive(Debug, Clone)]
pub struct AmqpTransport {
    channel: Channel,
    exchange: String,
}

impl AmqpTransport {
    pub fn new(channel: Channel, exchange: impl Into<String>) -> Self {
        Self {
            channel,
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    #[instrument(level = "debug", skip(self, envelope), fields(exchange = %self.exchange), err)]
    async fn send(&self, entity_path: &str, envelope: Envelope) -> Result<()> {
        let properties = to_amqp_properties(&envelope)?;
        let payload = envelope.body.unwrap_or_default();

        debug!(
            "[busenv_BROKER] Publishing message to {} on the AMQP server.",
            entity_path
        );

        self.channel
            .basic_publish(
                self.exchange(),
                entity_path,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;

        Ok(())
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn receive(&self, entity_path: &str) -> Result<Option<Envelope>> {
        let message = match self
            .channel
            .basic_get(entity_path, BasicGetOptions::default())
            .await?
        {
            Some(message) => message,
            None => return Ok(None),
        };

        let delivery = message.delivery;
        let envelope = match from_amqp(delivery.data.clone(), &delivery.properties) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "rejecting message with unsupported headers");
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
                return Err(err);
            }
        };
        delivery.ack(BasicAckOptions::default()).await?;

        Ok(Some(envelope))
    }
}

/// Maps envelope metadata and properties onto AMQP basic properties.
///
/// Timestamps travel as AMQP timestamps, which are unsigned whole seconds:
/// sub-second precision is dropped and times before the Unix epoch are
/// rejected.
pub fn to_amqp_properties(envelope: &Envelope) -> Result<AmqpProperties> {
    let mut headers = FieldTable::default();
    for (key, value) in &envelope.properties {
        headers.insert(ShortString::from(key.as_str()), to_header(key, value)?);
    }

    let mut properties = AmqpProperties::default().with_headers(headers);
    if let Some(id) = &envelope.message_id {
        properties = properties.with_message_id(id.as_str().into());
    }
    if let Some(content_type) = &envelope.content_type {
        properties = properties.with_content_type(content_type.as_str().into());
    }
    if let Some(correlation_id) = &envelope.correlation_id {
        properties = properties.with_correlation_id(correlation_id.as_str().into());
    }
    if let Some(label) = &envelope.label {
        properties = properties.with_type(label.as_str().into());
    }

    Ok(properties)
}

/// Rebuilds an envelope from a delivered payload and its properties.
///
/// Decimal headers become their exact decimal text. Nested tables and arrays
/// have no property form and are rejected.
pub fn from_amqp(data: Vec<u8>, properties: &AmqpProperties) -> Result<Envelope> {
    let owned = |s: &Option<ShortString>| s.as_ref().map(|s| s.as_str().to_owned());

    let mut properties_map = Properties::new();
    if let Some(headers) = properties.headers() {
        for (key, value) in headers.inner() {
            properties_map.insert(key.as_str().to_owned(), from_header(key.as_str(), value)?);
        }
    }

    Ok(Envelope {
        message_id: owned(properties.message_id()),
        content_type: owned(properties.content_type()),
        correlation_id: owned(properties.correlation_id()),
        label: owned(properties.kind()),
        body: Some(data.into()),
        properties: properties_map,
    })
}

fn unsupported(key: &str, reason: impl Into<String>) -> Error {
    Error::UnsupportedHeader {
        key: key.to_owned(),
        reason: reason.into(),
    }
}

fn to_header(key: &str, value: &PropertyValue) -> Result<AMQPValue> {
    Ok(match value {
        PropertyValue::Null => AMQPValue::Void,
        PropertyValue::Bool(b) => AMQPValue::Boolean(*b),
        PropertyValue::Int(i) => AMQPValue::LongLongInt(*i),
        PropertyValue::Double(d) => AMQPValue::Double(*d),
        PropertyValue::String(s) => AMQPValue::LongString(s.as_str().into()),
        PropertyValue::Timestamp(t) => {
            let secs = u64::try_from(t.timestamp())
                .map_err(|_| unsupported(key, format!("timestamp {} is before 1970", t)))?;
            AMQPValue::Timestamp(secs)
        }
        PropertyValue::Bytes(b) => AMQPValue::ByteArray(b.clone().into()),
    })
}

fn from_header(key: &str, value: &AMQPValue) -> Result<PropertyValue> {
    Ok(match value {
        AMQPValue::Void => PropertyValue::Null,
        AMQPValue::Boolean(b) => PropertyValue::Bool(*b),
        AMQPValue::ShortShortInt(i) => PropertyValue::Int((*i).into()),
        AMQPValue::ShortShortUInt(i) => PropertyValue::Int((*i).into()),
        AMQPValue::ShortInt(i) => PropertyValue::Int((*i).into()),
        AMQPValue::ShortUInt(i) => PropertyValue::Int((*i).into()),
        AMQPValue::LongInt(i) => PropertyValue::Int((*i).into()),
        AMQPValue::LongUInt(i) => PropertyValue::Int((*i).into()),
        AMQPValue::LongLongInt(i) => PropertyValue::Int(*i),
        AMQPValue::Float(f) => PropertyValue::Double((*f).into()),
        AMQPValue::Double(d) => PropertyValue::Double(*d),
        AMQPValue::DecimalValue(d) => PropertyValue::String(decimal_text(d)),
        AMQPValue::ShortString(s) => PropertyValue::String(s.as_str().to_owned()),
        AMQPValue::LongString(s) => {
            PropertyValue::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::Timestamp(t) => i64::try_from(*t)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .map(PropertyValue::Timestamp)
            .ok_or_else(|| unsupported(key, format!("timestamp {} is out of range", t)))?,
        AMQPValue::ByteArray(b) => PropertyValue::Bytes(b.as_slice().to_vec()),
        AMQPValue::FieldArray(_) => {
            return Err(unsupported(key, "nested arrays are not supported"))
        }
        AMQPValue::FieldTable(_) => {
            return Err(unsupported(key, "nested tables are not supported"))
        }
    })
}

fn decimal_text(decimal: &DecimalValue) -> String {
    let digits = decimal.value.to_string();
    let scale = usize::from(decimal.scale);
    if scale == 0 {
        return digits;
    }

    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{}.{}", whole, fraction)
}
