//! Topic broker for Impulse.
//!
//! The broker maps topic names to subscriber handles and fans payloads out
//! to them. It knows nothing about usernames.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::topic::{validate_topic_name, Topic};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Broker errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Invalid topic name.
    #[error("Invalid topic name: {0}")]
    InvalidTopic(&'static str),

    /// Maximum number of topics reached.
    #[error("Maximum topics reached")]
    MaxTopicsReached,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum number of live topics.
    pub max_topics: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { max_topics: 10_000 }
    }
}

/// Result of a single publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the payload was handed to.
    pub delivered: usize,
    /// Subscribers whose send failed; the caller tears them down.
    pub failed: Vec<ConnectionId>,
}

impl PublishReport {
    /// Whether nobody was reached, successfully or not.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.failed.is_empty()
    }
}

/// The topic broker.
pub struct TopicBroker {
    /// Topics indexed by name.
    topics: DashMap<String, Topic>,
    /// Connection subscriptions (connection -> topic names).
    subscriptions: DashMap<ConnectionId, HashSet<String>>,
    config: BrokerConfig,
}

impl TopicBroker {
    /// Create a broker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a broker with custom configuration.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        info!("Creating topic broker with config: {:?}", config);
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            topic_count: self.topics.len(),
            connection_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
        }
    }

    /// Subscribe a connection to a topic, creating the topic if needed.
    ///
    /// Returns `false` if the connection was already subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid or the topic limit is
    /// reached.
    pub fn subscribe(
        &self,
        handle: Arc<dyn ConnectionHandle>,
        topic_name: &str,
    ) -> Result<bool, BrokerError> {
        validate_topic_name(topic_name).map_err(BrokerError::InvalidTopic)?;

        if !self.topics.contains_key(topic_name) && self.topics.len() >= self.config.max_topics {
            return Err(BrokerError::MaxTopicsReached);
        }

        Ok(self.join(handle, topic_name))
    }

    /// Subscribe a connection to a topic whose name the relay derived
    /// itself, such as `user:<username>`.
    ///
    /// Skips name validation and the topic limit: there is one such topic
    /// per registered username or partition, so receivers are never
    /// refused. Returns `false` if the connection was already subscribed.
    pub fn join(&self, handle: Arc<dyn ConnectionHandle>, topic_name: &str) -> bool {
        let id = handle.id();
        let added = {
            let mut topic = self
                .topics
                .entry(topic_name.to_string())
                .or_insert_with(|| {
                    debug!(topic = %topic_name, "Creating new topic");
                    Topic::new(topic_name)
                });
            topic.subscribe(handle)
        };

        self.subscriptions
            .entry(id)
            .or_default()
            .insert(topic_name.to_string());

        added
    }

    /// Unsubscribe a connection from one topic.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&self, id: ConnectionId, topic_name: &str) -> bool {
        let was_listed = match self.subscriptions.get_mut(&id) {
            Some(mut topics) => {
                let removed = topics.remove(topic_name);
                if topics.is_empty() {
                    drop(topics);
                    self.subscriptions.remove_if(&id, |_, t| t.is_empty());
                }
                removed
            }
            None => false,
        };

        let was_member = self.leave_topic(id, topic_name);
        was_listed || was_member
    }

    /// Unsubscribe a connection from every topic.
    ///
    /// Returns the number of topics it left.
    pub fn unsubscribe_all(&self, id: ConnectionId) -> usize {
        let Some((_, topics)) = self.subscriptions.remove(&id) else {
            return 0;
        };

        let left = topics
            .iter()
            .filter(|name| self.leave_topic(id, name))
            .count();

        debug!(connection = %id, topics = left, "Unsubscribed from all topics");
        left
    }

    /// Remove `id` from a topic, dropping the topic once it is empty.
    fn leave_topic(&self, id: ConnectionId, topic_name: &str) -> bool {
        let Some(mut topic) = self.topics.get_mut(topic_name) else {
            return false;
        };
        let removed = topic.unsubscribe(id);
        if topic.is_empty() {
            drop(topic);
            if self
                .topics
                .remove_if(topic_name, |_, t| t.is_empty())
                .is_some()
            {
                debug!(topic = %topic_name, "Deleted empty topic");
            }
        }
        removed
    }

    /// Publish a payload to every subscriber of a topic.
    ///
    /// Each subscriber is sent the payload at most once. A failing
    /// subscriber is reported in [`PublishReport::failed`] and does not stop
    /// delivery to the others.
    pub fn publish(&self, topic_name: &str, payload: Bytes) -> PublishReport {
        let subscribers = match self.topics.get(topic_name) {
            Some(topic) => topic.snapshot(),
            None => {
                trace!(topic = %topic_name, "Publish to topic without subscribers");
                return PublishReport::default();
            }
        };

        let mut report = PublishReport::default();
        for handle in subscribers {
            match handle.send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(topic = %topic_name, connection = %handle.id(), error = %e, "Delivery failed");
                    report.failed.push(handle.id());
                }
            }
        }

        trace!(
            topic = %topic_name,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Published payload"
        );
        report
    }

    /// Check if a topic exists.
    #[must_use]
    pub fn topic_exists(&self, topic_name: &str) -> bool {
        self.topics.contains_key(topic_name)
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic_name: &str) -> usize {
        self.topics
            .get(topic_name)
            .map(|t| t.subscriber_count())
            .unwrap_or(0)
    }

    /// Get the subscriber IDs of a topic.
    #[must_use]
    pub fn subscribers(&self, topic_name: &str) -> Vec<ConnectionId> {
        self.topics
            .get(topic_name)
            .map(|t| t.subscriber_ids())
            .unwrap_or_default()
    }

    /// Get all topic names.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    /// Get the topics a connection is subscribed to.
    #[must_use]
    pub fn topics_of(&self, id: ConnectionId) -> Vec<String> {
        self.subscriptions
            .get(&id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for TopicBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BrokerStats {
    /// Number of live topics.
    pub topic_count: usize,
    /// Number of connections with at least one subscription.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;

    #[test]
    fn test_broker_subscribe_unsubscribe() {
        let broker = TopicBroker::new();
        let conn = MockConnection::new();

        assert_eq!(broker.subscribe(conn.clone(), "test:topic"), Ok(true));
        assert!(broker.topic_exists("test:topic"));
        assert_eq!(broker.subscriber_count("test:topic"), 1);

        assert!(broker.unsubscribe(conn.id(), "test:topic"));
        // Topic should be deleted once empty
        assert!(!broker.topic_exists("test:topic"));
        assert!(!broker.unsubscribe(conn.id(), "test:topic"));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let broker = TopicBroker::new();
        let conn = MockConnection::new();

        assert_eq!(broker.subscribe(conn.clone(), "test"), Ok(true));
        assert_eq!(broker.subscribe(conn.clone(), "test"), Ok(false));
        assert_eq!(broker.subscriber_count("test"), 1);
        assert_eq!(broker.stats().total_subscriptions, 1);

        let report = broker.publish("test", Bytes::from_static(b"ring"));
        assert_eq!(report.delivered, 1);
        assert_eq!(conn.received(), vec!["ring"]);
    }

    #[test]
    fn test_broker_publish_fanout() {
        let broker = TopicBroker::new();
        let conn1 = MockConnection::new();
        let conn2 = MockConnection::new();
        let outsider = MockConnection::new();

        broker.subscribe(conn1.clone(), "test").unwrap();
        broker.subscribe(conn2.clone(), "test").unwrap();
        broker.subscribe(outsider.clone(), "other").unwrap();

        let report = broker.publish("test", Bytes::from_static(b"hello"));
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());

        assert_eq!(conn1.received(), vec!["hello"]);
        assert_eq!(conn2.received(), vec!["hello"]);
        assert!(outsider.received().is_empty());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broker = TopicBroker::new();
        let report = broker.publish("nobody:home", Bytes::from_static(b"ring"));
        assert!(report.is_empty());
        assert!(!broker.topic_exists("nobody:home"));
    }

    #[test]
    fn test_failed_subscriber_does_not_stop_fanout() {
        let broker = TopicBroker::new();
        let healthy = MockConnection::new();
        let broken = MockConnection::new();
        broken.break_sends();

        broker.subscribe(healthy.clone(), "test").unwrap();
        broker.subscribe(broken.clone(), "test").unwrap();

        let report = broker.publish("test", Bytes::from_static(b"ring"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![broken.id()]);
        assert_eq!(healthy.received(), vec!["ring"]);
    }

    #[test]
    fn test_broker_invalid_topic() {
        let broker = TopicBroker::new();
        let conn = MockConnection::new();

        assert!(matches!(
            broker.subscribe(conn.clone(), ""),
            Err(BrokerError::InvalidTopic(_))
        ));
        assert!(matches!(
            broker.subscribe(conn, "$system"),
            Err(BrokerError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_broker_topic_limit() {
        let broker = TopicBroker::with_config(BrokerConfig { max_topics: 1 });
        let conn = MockConnection::new();

        broker.subscribe(conn.clone(), "one").unwrap();
        assert_eq!(
            broker.subscribe(conn.clone(), "two"),
            Err(BrokerError::MaxTopicsReached)
        );
        // Existing topics still accept subscribers
        assert_eq!(broker.subscribe(MockConnection::new(), "one"), Ok(true));
    }

    #[test]
    fn test_join_skips_name_checks_and_topic_limit() {
        let broker = TopicBroker::with_config(BrokerConfig { max_topics: 1 });
        let conn = MockConnection::new();
        let long_name = format!("user:{}", "a".repeat(300));

        broker.subscribe(conn.clone(), "one").unwrap();
        assert!(broker.join(conn.clone(), &long_name));
        assert!(!broker.join(conn.clone(), &long_name));
        assert_eq!(broker.stats().topic_count, 2);

        let report = broker.publish(&long_name, Bytes::from_static(b"ring"));
        assert_eq!(report.delivered, 1);
        assert_eq!(broker.unsubscribe_all(conn.id()), 2);
        assert_eq!(broker.stats().topic_count, 0);
    }

    #[test]
    fn test_unsubscribe_all_is_idempotent() {
        let broker = TopicBroker::new();
        let conn = MockConnection::new();
        let other = MockConnection::new();

        broker.subscribe(conn.clone(), "topic-1").unwrap();
        broker.subscribe(conn.clone(), "topic-2").unwrap();
        broker.subscribe(other.clone(), "topic-2").unwrap();

        assert_eq!(broker.unsubscribe_all(conn.id()), 2);
        let after_first = broker.stats();
        assert_eq!(broker.unsubscribe_all(conn.id()), 0);
        assert_eq!(broker.stats(), after_first);

        assert!(!broker.topic_exists("topic-1"));
        assert_eq!(broker.subscribers("topic-2"), vec![other.id()]);
        assert!(broker.topics_of(conn.id()).is_empty());
    }

    #[test]
    fn test_broker_stats() {
        let broker = TopicBroker::new();
        let conn1 = MockConnection::new();
        let conn2 = MockConnection::new();

        broker.subscribe(conn1.clone(), "topic-1").unwrap();
        broker.subscribe(conn1.clone(), "topic-2").unwrap();
        broker.subscribe(conn2.clone(), "topic-1").unwrap();

        let stats = broker.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.total_subscriptions, 3);

        let mut names = broker.topic_names();
        names.sort();
        assert_eq!(names, vec!["topic-1", "topic-2"]);
    }
}
