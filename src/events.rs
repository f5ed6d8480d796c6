//! Process-local topic bus. Nothing is persisted and nothing is replayed.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::model::{Event, Topic};

type Registry = HashMap<Topic, Vec<UnboundedSender<Event>>>;

/// Cheap to clone; every clone shares the same subscriber table.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an existing channel for `topic` for the lifetime of the bus.
    pub fn register(&self, topic: Topic, channel: UnboundedSender<Event>) {
        self.registry().entry(topic).or_default().push(channel);
    }

    /// Creates a channel, registers its sender and hands back the receiver.
    pub fn subscribe(&self, topic: Topic) -> UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(topic, tx);
        rx
    }

    /// Delivers `event` to every live subscriber of `topic` and returns how many got it.
    /// Never blocks. Subscribers whose receiver is gone are dropped from the table.
    pub fn publish(&self, topic: Topic, event: Event) -> usize {
        let mut registry = self.registry();
        let Some(channels) = registry.get_mut(&topic) else {
            debug!(topic = topic.as_str(), "no subscribers; event dropped");
            return 0;
        };
        channels.retain(|tx| tx.send(event.clone()).is_ok());
        if channels.is_empty() {
            debug!(topic = topic.as_str(), "all subscribers gone; event dropped");
        }
        channels.len()
    }

    /// Drops every sender registered for `topic`. Consumers drain what is already queued
    /// and then see their channel end.
    pub fn close(&self, topic: Topic) {
        self.registry().remove(&topic);
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry().get(&topic).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawExtractedRecord;
    use chrono::Utc;

    fn event(title: &str) -> Event {
        Event::ScrapedArticle(RawExtractedRecord {
            title: title.into(),
            url: String::new(),
            image_url: String::new(),
            posted_at: Utc::now(),
            author_name: "alice".into(),
            author_page_url: String::new(),
            author_avatar_url: String::new(),
            summary: String::new(),
            tag: String::new(),
            read_duration: String::new(),
        })
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe(Topic::SaveScrapedArticle);
        let mut b = bus.subscribe(Topic::SaveScrapedArticle);
        let mut other = bus.subscribe(Topic::ScrapeSingleArticle);

        assert_eq!(bus.publish(Topic::SaveScrapedArticle, event("one")), 2);

        assert_eq!(a.recv().await, Some(event("one")));
        assert_eq!(b.recv().await, Some(event("one")));
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Topic::SaveScrapedArticle, event("lost")), 0);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Topic::SaveScrapedArticle);
        let _keep = bus.subscribe(Topic::SaveScrapedArticle);
        drop(rx);

        assert_eq!(bus.publish(Topic::SaveScrapedArticle, event("x")), 1);
        assert_eq!(bus.subscriber_count(Topic::SaveScrapedArticle), 1);
    }

    #[tokio::test]
    async fn close_lets_consumers_drain_and_finish() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Topic::SaveScrapedArticle);
        bus.publish(Topic::SaveScrapedArticle, event("queued"));
        bus.close(Topic::SaveScrapedArticle);

        assert_eq!(rx.recv().await, Some(event("queued")));
        assert_eq!(rx.recv().await, None);
        assert_eq!(bus.publish(Topic::SaveScrapedArticle, event("late")), 0);
    }

    #[tokio::test]
    async fn registered_channel_receives_from_clones() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register(Topic::ScrapeSingleArticle, tx);

        let producer = bus.clone();
        producer.publish(Topic::ScrapeSingleArticle, event("via clone"));
        assert_eq!(rx.recv().await, Some(event("via clone")));
    }
}
