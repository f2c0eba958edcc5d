//! In-memory holder of the four controllable values.
//!
//! The store is owned by the session task and mutated only there, so it
//! needs no locking. Subscribers are notified synchronously in the calling
//! context; both driver-originated sets and peripheral-originated reads
//! flow through the same notification path.

use crate::domain::models::{Attribute, AttributeRequest, AttributeValue, OutOfRange};

type Subscriber = Box<dyn FnMut(AttributeValue) + Send>;

pub struct AttributeStore {
    values: [Option<AttributeValue>; 4],
    subscribers: Vec<Subscriber>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self {
            values: [None; 4],
            subscribers: Vec::new(),
        }
    }

    /// Validate and apply a requested change. On a range error the store
    /// is left untouched.
    pub fn set(&mut self, request: AttributeRequest) -> Result<AttributeValue, OutOfRange> {
        let value = request.validate()?;
        self.apply(value);
        Ok(value)
    }

    /// Apply an already-validated value, e.g. one decoded from a
    /// characteristic read.
    pub fn apply(&mut self, value: AttributeValue) {
        self.values[value.attribute().index()] = Some(value);
        for subscriber in &mut self.subscribers {
            subscriber(value);
        }
    }

    /// Last known value, or `None` while the attribute is uninitialized
    /// (no read has completed and nothing was set locally).
    pub fn get(&self, attribute: Attribute) -> Option<AttributeValue> {
        self.values[attribute.index()]
    }

    pub fn subscribe(&mut self, subscriber: impl FnMut(AttributeValue) + Send + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// True once every attribute holds a value.
    pub fn is_initialized(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self::new()
    }
}
