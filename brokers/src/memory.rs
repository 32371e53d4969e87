use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use busenv_model::Envelope;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::{
    error::{Error, Result},
    rule::SubscriptionRule,
    transport::Transport,
};

const SUBSCRIPTIONS_SEGMENT: &str = "/subscriptions/";

/// The entity path of subscription `name` on `topic`, usable with
/// [`Transport::receive`].
pub fn subscription_path(topic: &str, name: &str) -> String {
    format!("{}{}{}", topic, SUBSCRIPTIONS_SEGMENT, name)
}

#[derive(Debug)]
struct Subscription {
    name: String,
    rule: SubscriptionRule,
    messages: VecDeque<Envelope>,
}

#[derive(Debug, Default)]
struct Entities {
    queues: HashMap<String, VecDeque<Envelope>>,
    topics: HashMap<String, Vec<Subscription>>,
}

impl Entities {
    fn exists(&self, name: &str) -> bool {
        self.queues.contains_key(name) || self.topics.contains_key(name)
    }
}

/// An in-process bus with queues and topics. Topics fan out to every
/// subscription whose rule admits the message.
///
/// MemoryTransport is internally reference counted and can be safely cloned.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    entities: Arc<Mutex<Entities>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue and topic names must not contain `/subscriptions/`, which is
    /// reserved for subscription paths.
    pub async fn create_queue(&self, name: &str) -> Result<()> {
        check_entity_name(name)?;
        let mut entities = self.entities.lock().await;
        if entities.exists(name) {
            return Err(Error::EntityExists(name.to_owned()));
        }

        entities.queues.insert(name.to_owned(), VecDeque::new());
        Ok(())
    }

    pub async fn create_topic(&self, name: &str) -> Result<()> {
        check_entity_name(name)?;
        let mut entities = self.entities.lock().await;
        if entities.exists(name) {
            return Err(Error::EntityExists(name.to_owned()));
        }

        entities.topics.insert(name.to_owned(), Vec::new());
        Ok(())
    }

    pub async fn create_subscription(
        &self,
        topic: &str,
        name: &str,
        rule: SubscriptionRule,
    ) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidEntityName(name.to_owned()));
        }

        let mut entities = self.entities.lock().await;
        let subscriptions = entities
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::EntityNotFound(topic.to_owned()))?;

        if subscriptions.iter().any(|s| s.name == name) {
            return Err(Error::EntityExists(subscription_path(topic, name)));
        }

        subscriptions.push(Subscription {
            name: name.to_owned(),
            rule,
            messages: VecDeque::new(),
        });
        Ok(())
    }

    pub async fn queue_exists(&self, name: &str) -> bool {
        self.entities.lock().await.queues.contains_key(name)
    }

    pub async fn topic_exists(&self, name: &str) -> bool {
        self.entities.lock().await.topics.contains_key(name)
    }

    pub async fn subscription_exists(&self, topic: &str, name: &str) -> bool {
        self.entities
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(false, |subs| subs.iter().any(|s| s.name == name))
    }

    /// Number of envelopes waiting on a queue or subscription path.
    pub async fn pending(&self, entity_path: &str) -> Result<usize> {
        let mut entities = self.entities.lock().await;
        Ok(mailbox(&mut entities, entity_path)?.len())
    }
}

fn check_entity_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SUBSCRIPTIONS_SEGMENT) {
        return Err(Error::InvalidEntityName(name.to_owned()));
    }
    Ok(())
}

fn mailbox<'e>(entities: &'e mut Entities, entity_path: &str) -> Result<&'e mut VecDeque<Envelope>> {
    let not_found = || Error::EntityNotFound(entity_path.to_owned());

    match entity_path.split_once(SUBSCRIPTIONS_SEGMENT) {
        Some((topic, name)) => entities
            .topics
            .get_mut(topic)
            .and_then(|subs| subs.iter_mut().find(|s| s.name == name))
            .map(|s| &mut s.messages)
            .ok_or_else(not_found),
        None => entities.queues.get_mut(entity_path).ok_or_else(not_found),
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    #[instrument(level = "debug", skip(self, envelope), fields(message_id = ?envelope.message_id), err)]
    async fn send(&self, entity_path: &str, envelope: Envelope) -> Result<()> {
        let mut entities = self.entities.lock().await;

        if let Some(queue) = entities.queues.get_mut(entity_path) {
            queue.push_back(envelope);
            return Ok(());
        }

        let subscriptions = entities
            .topics
            .get_mut(entity_path)
            .ok_or_else(|| Error::EntityNotFound(entity_path.to_owned()))?;

        for subscription in subscriptions.iter_mut() {
            if subscription.rule.matches(&envelope.properties) {
                subscription.messages.push_back(envelope.clone());
            } else {
                debug!(
                    subscription = %subscription.name,
                    rule = %subscription.rule.name,
                    "message filtered out"
                );
            }
        }

        Ok(())
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn receive(&self, entity_path: &str) -> Result<Option<Envelope>> {
        let mut entities = self.entities.lock().await;
        Ok(mailbox(&mut entities, entity_path)?.pop_front())
    }
}
