// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed event channels that hosts subscribe to.

use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel};

/// A publish mechanism for events of type `T`.
///
/// Every event fired is delivered, in order, to every subscriber that exists at the time it is
/// fired. Subscribers that have been dropped are forgotten on the next fire.
#[derive(Debug)]
pub struct EventChannel<T> {
    subscribers: Mutex<Vec<UnboundedSender<T>>>,
}

impl<T: Clone> EventChannel<T> {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to events fired from now on.
    pub fn subscribe(&self) -> EventReceiver<T> {
        let (tx, rx) = unbounded_channel();
        self.lock().push(tx);
        EventReceiver { rx }
    }

    /// Delivers `event` to every current subscriber. Never blocks.
    pub fn fire(&self, event: T) {
        self.lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UnboundedSender<T>>> {
        // Senders stay valid even if a previous holder panicked.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving half of a subscription to an [`EventChannel`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> EventReceiver<T> {
    /// Waits for the next event. Returns `None` once the channel itself has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Returns every event that is ready, in order.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
