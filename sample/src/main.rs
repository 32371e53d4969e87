use anyhow::{Context, Result};
use clap::Parser;
use lapin::{
    options::{ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, error, info};

use busenv_brokers::{
    amqp::AmqpTransport,
    memory::subscription_path,
    model::Envelope,
    EnvironmentStampingPlugin, MemoryTransport, ReceiverClient, SenderClient, SubscriptionRule,
    Transport, ENV_PROPERTY_KEY,
};

use crate::{
    conf::{Config, TransportKind},
    logging::init_logging,
};

mod conf;
mod logging;

const SUBSCRIPTION: &str = "development";
const ENV_RULE: &str = "EnvRule";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.log_format);

    info!(
        event = "config_loaded",
        environment = %config.environment,
        transport = ?config.transport,
        queue = %config.queue,
        topic = %config.topic,
        messages = config.messages,
        "Configuration loaded"
    );

    match config.transport {
        TransportKind::Memory => {
            let admitted = run_memory(&config).await?;
            info!(
                event = "subscription_drained",
                subscription = SUBSCRIPTION,
                admitted,
                "Subscription rule admitted {} of {} topic messages",
                admitted,
                config.messages
            );
        }
        TransportKind::Amqp => run_amqp(&config).await?,
    }

    info!(event = "sample_finished", "Done");
    Ok(())
}

/// Runs the sample against an in-process bus. Returns how many topic messages
/// the `Env LIKE 'Development'` subscription admitted.
async fn run_memory(config: &Config) -> Result<usize> {
    let bus = MemoryTransport::new();

    if !bus.queue_exists(&config.queue).await {
        bus.create_queue(&config.queue).await?;
    }
    if !bus.topic_exists(&config.topic).await {
        bus.create_topic(&config.topic).await?;
    }
    if !bus.subscription_exists(&config.topic, SUBSCRIPTION).await {
        let filter = format!("{} LIKE 'Development'", ENV_PROPERTY_KEY);
        let rule = SubscriptionRule::sql(ENV_RULE, &filter).context("Invalid subscription rule")?;
        bus.create_subscription(&config.topic, SUBSCRIPTION, rule)
            .await?;
    }

    send_all(config, bus.clone()).await?;

    let receiver = ReceiverClient::new(subscription_path(&config.topic, SUBSCRIPTION), bus);
    let mut admitted = 0;
    while let Some(envelope) = receiver.receive().await? {
        debug!(
            event = "message_received",
            message_id = ?envelope.message_id,
            env = %envelope
                .property(ENV_PROPERTY_KEY)
                .map(ToString::to_string)
                .unwrap_or_default(),
            "Received message from subscription"
        );
        admitted += 1;
    }

    Ok(admitted)
}

async fn run_amqp(config: &Config) -> Result<()> {
    let connection = Connection::connect(&config.amqp_uri, ConnectionProperties::default())
        .await
        .context("Failed to connect to AMQP broker")?;
    let channel = connection
        .create_channel()
        .await
        .context("Failed to create channel")?;

    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .context("Failed to enable publisher confirms")?;
    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare exchange")?;

    for name in [config.queue.as_str(), config.topic.as_str()].iter() {
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue {}", name))?;
        channel
            .queue_bind(
                name,
                &config.exchange,
                name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to bind queue {}", name))?;
    }

    send_all(config, AmqpTransport::new(channel, config.exchange.clone())).await
}

/// Sends the configured number of messages to the queue and then the topic,
/// through one stamping client each.
async fn send_all<T>(config: &Config, transport: T) -> Result<()>
where
    T: Transport + Clone,
{
    let mut queue_client = SenderClient::new(config.queue.as_str(), transport.clone());
    queue_client.register_plugin(EnvironmentStampingPlugin::new(config.environment.as_str()))?;
    send_messages(&queue_client, config.messages).await;

    let mut topic_client = SenderClient::new(config.topic.as_str(), transport);
    topic_client.register_plugin(EnvironmentStampingPlugin::new(config.environment.as_str()))?;
    send_messages(&topic_client, config.messages).await;

    Ok(())
}

/// Send failures are logged and end the loop; they do not fail the sample.
async fn send_messages<T>(client: &SenderClient<T>, count: usize)
where
    T: Transport,
{
    for i in 0..count {
        let body = format!("Message {}", i);
        info!(
            event = "message_sending",
            entity = client.entity_path(),
            body = %body,
            "Sending message"
        );

        if let Err(e) = client.send(Envelope::new(body)).await {
            error!(
                event = "send_failed",
                entity = client.entity_path(),
                error = %e,
                "Failed to send message"
            );
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(environment: &str) -> Config {
        Config::try_parse_from([
            "busenv-sample",
            "--environment",
            environment,
            "--messages",
            "4",
        ])
        .expect("config")
    }

    #[tokio::test]
    async fn development_messages_pass_the_rule() {
        assert_eq!(run_memory(&config("Development")).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn other_environments_are_filtered() {
        assert_eq!(run_memory(&config("Production")).await.unwrap(), 0);
        assert_eq!(run_memory(&config("development")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queue_receives_stamped_messages() {
        let config = config("Staging");
        let bus = MemoryTransport::new();
        bus.create_queue(&config.queue).await.unwrap();
        bus.create_topic(&config.topic).await.unwrap();

        send_all(&config, bus.clone()).await.unwrap();

        let mut received = 0;
        while let Some(envelope) = bus.receive(&config.queue).await.unwrap() {
            assert_eq!(
                envelope.property(ENV_PROPERTY_KEY).and_then(|v| v.as_str()),
                Some("Staging")
            );
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn missing_queue_is_logged_not_fatal() {
        let config = config("Development");
        let bus = MemoryTransport::new();

        send_all(&config, bus).await.expect("send errors are logged");
    }
}
