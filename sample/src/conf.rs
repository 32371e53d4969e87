use clap::{Parser, ValueEnum};

use crate::logging::LogFormat;

/// Environment stamped when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "Production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// In-process bus with a filtered topic subscription.
    Memory,
    /// A RabbitMQ (or other AMQP 0.9.1) broker.
    Amqp,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "busenv-sample",
    about = "Sends environment-stamped messages to a queue and a topic."
)]
pub struct Config {
    /// Environment label stamped into the `Env` property of every message.
    #[arg(long, env = "APP_ENVIRONMENT", default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,

    #[arg(long, env = "BUS_TRANSPORT", value_enum, default_value_t = TransportKind::Memory)]
    pub transport: TransportKind,

    #[arg(long, env = "AMQP_URI", default_value = "amqp://127.0.0.1:5672/%2f")]
    pub amqp_uri: String,

    #[arg(long, env = "BUS_EXCHANGE", default_value = "busenv")]
    pub exchange: String,

    #[arg(long, env = "BUS_QUEUE", default_value = "plugin")]
    pub queue: String,

    #[arg(long, env = "BUS_TOPIC", default_value = "plugintopic")]
    pub topic: String,

    /// Messages sent to each of the queue and the topic.
    #[arg(long, env = "BUS_MESSAGES", default_value_t = 10)]
    pub messages: usize,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}
