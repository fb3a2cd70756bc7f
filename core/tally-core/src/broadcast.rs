//! Fan-out of values to any number of subscribers.
//!
//! Each subscriber gets its own `mpsc` receiver. Subscribers that have been
//! dropped are pruned on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

#[derive(Debug)]
pub struct Broadcaster<T: Clone> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    /// Sends `value` to every live subscriber. Returns how many received it.
    pub fn publish(&self, value: T) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        subscribers.len()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_published_value() {
        let broadcaster = Broadcaster::new();
        let first = broadcaster.subscribe();
        let second = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(7u32), 2);
        assert_eq!(first.try_recv().expect("first"), 7);
        assert_eq!(second.try_recv().expect("second"), 7);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let broadcaster = Broadcaster::new();
        let kept = broadcaster.subscribe();
        drop(broadcaster.subscribe());

        assert_eq!(broadcaster.publish("x".to_string()), 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(kept.try_recv().expect("kept"), "x");
    }
}
