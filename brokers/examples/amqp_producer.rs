use std::env;

use busenv_brokers::{amqp::AmqpTransport, model::Envelope, EnvironmentStampingPlugin, SenderClient};
use lapin::{Connection, ConnectionProperties};

#[tokio::main]
async fn main() {
    let amqp_uri = env::var("AMQP_URI").unwrap_or("amqp://127.0.0.1:5672/%2f".into());
    let environment = env::var("APP_ENVIRONMENT").unwrap_or("Development".into());

    let connection = Connection::connect(&amqp_uri, ConnectionProperties::default())
        .await
        .expect("Failed to connect to the AMQP server");
    let channel = connection
        .create_channel()
        .await
        .expect("Failed to open channel");

    let mut client = SenderClient::new("foobar", AmqpTransport::new(channel, ""));
    client
        .register_plugin(EnvironmentStampingPlugin::new(environment))
        .expect("Failed to register plugin");

    match client.send(Envelope::new(&b"{'message': 'hello'}"[..])).await {
        Ok(_) => println!("Message successfully published."),
        Err(e) => panic!("Failed to publish message: {:?}", e),
    };
}
