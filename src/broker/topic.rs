//! Topic management
//!
//! A `Topic` holds the subscribers of one topic name, each with the QoS it
//! subscribed at, plus the retained message slot for that name. Matching is
//! exact string equality; wildcard matching belongs to the routing layer in
//! front of this table.
//!
//! A retained slot holds a counted reference, exactly like a delivery entry,
//! so a retained payload survives until it is replaced or cleared.

use std::collections::HashMap;

use crate::broker::message::QoS;
use crate::broker::store::{StoreHandle, StoreRef};

pub type SubscriberId = String;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashMap<SubscriberId, QoS>,
    retained: Option<StoreRef>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
            retained: None,
        }
    }

    /// Add a subscriber, or update its QoS if already subscribed.
    pub fn subscribe(&mut self, id: SubscriberId, qos: QoS) {
        self.subscribers.insert(id, qos);
    }

    /// Remove a subscriber from the topic.
    pub fn unsubscribe(&mut self, id: &str) {
        self.subscribers.remove(id);
    }

    pub fn retained(&self) -> Option<&StoreHandle> {
        self.retained.as_ref().map(StoreRef::handle)
    }

    fn is_unused(&self) -> bool {
        self.subscribers.is_empty() && self.retained.is_none()
    }
}

#[derive(Debug, Default)]
pub struct TopicTable {
    topics: HashMap<String, Topic>,
}

impl TopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `id` to `topic`. Returns the retained message to replay to
    /// the new subscriber, if the topic has one.
    pub fn subscribe(&mut self, topic: &str, id: &str, qos: QoS) -> Option<StoreHandle> {
        let entry = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));
        entry.subscribe(id.to_string(), qos);
        entry.retained().cloned()
    }

    pub fn unsubscribe(&mut self, topic: &str, id: &str) {
        if let Some(t) = self.topics.get_mut(topic) {
            t.unsubscribe(id);
            if t.is_unused() {
                self.topics.remove(topic);
            }
        }
    }

    /// Drop `id` from every topic.
    pub fn remove_subscriber(&mut self, id: &str) {
        for topic in self.topics.values_mut() {
            topic.unsubscribe(id);
        }
        self.topics.retain(|_, t| !t.is_unused());
    }

    /// Recipients of a message published on `topic`, ordered by id.
    pub fn subscribers(&self, topic: &str) -> Vec<(SubscriberId, QoS)> {
        let mut out: Vec<_> = self
            .topics
            .get(topic)
            .map(|t| t.subscribers.iter().map(|(id, q)| (id.clone(), *q)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Replace the retained message of `topic`. An empty payload clears the
    /// slot instead.
    pub fn retain(&mut self, topic: &str, stored: &StoreHandle) {
        if stored.payload().is_empty() {
            if let Some(t) = self.topics.get_mut(topic) {
                t.retained = None;
                if t.is_unused() {
                    self.topics.remove(topic);
                }
            }
            return;
        }
        let entry = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));
        entry.retained = Some(StoreRef::new(stored));
    }

    pub fn retained(&self, topic: &str) -> Option<&StoreHandle> {
        self.topics.get(topic).and_then(Topic::retained)
    }

    pub fn retained_iter(&self) -> impl Iterator<Item = (&str, &StoreHandle)> {
        self.topics
            .iter()
            .filter_map(|(name, t)| t.retained().map(|h| (name.as_str(), h)))
    }

    /// Release every retained slot. Returns how many were held.
    pub fn clear_retained(&mut self) -> usize {
        let mut cleared = 0;
        for topic in self.topics.values_mut() {
            if topic.retained.take().is_some() {
                cleared += 1;
            }
        }
        self.topics.retain(|_, t| !t.is_unused());
        cleared
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
