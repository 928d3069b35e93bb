use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Live feed of backend notifications.
///
/// Dropping the handle releases the backend listener, so every exit path of
/// the holder (normal teardown, early return, panic unwinding, task abort)
/// unsubscribes.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    unsubscribe: Option<Unsubscribe>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Waits for the next notification; `None` once the backend side is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct Listeners<T> {
    next_id: u64,
    latest: Option<T>,
    senders: HashMap<u64, mpsc::UnboundedSender<T>>,
}

/// Fans one value stream out to any number of subscriptions. New subscribers
/// get the latest value first, under the same lock that publishes, so no
/// notification can slip between the replay and registration.
pub struct Broadcaster<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new(initial: Option<T>) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                latest: initial,
                senders: HashMap::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut listeners = lock(&self.listeners);
            if let Some(latest) = &listeners.latest {
                let _ = tx.send(latest.clone());
            }
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.senders.insert(id, tx);
            id
        };

        let weak = Arc::downgrade(&self.listeners);
        Subscription::new(rx, move || {
            if let Some(listeners) = weak.upgrade() {
                lock(&listeners).senders.remove(&id);
            }
        })
    }

    pub fn publish(&self, value: T) {
        let mut listeners = lock(&self.listeners);
        listeners
            .senders
            .retain(|_, tx| tx.send(value.clone()).is_ok());
        listeners.latest = Some(value);
    }

    pub fn latest(&self) -> Option<T> {
        lock(&self.listeners).latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn new_subscriber_sees_latest_then_updates() {
        let hub = Broadcaster::new(Some(1));
        let mut sub = hub.subscribe();
        hub.publish(2);

        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, Some(2));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let hub: Broadcaster<u32> = Broadcaster::new(None);
        let first = hub.subscribe();
        let second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(), 1);

        second.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);
        hub.publish(7);
        assert_eq!(hub.latest(), Some(7));
    }

    #[tokio::test]
    async fn unsubscribe_hook_runs_once() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let (_tx, rx) = mpsc::unbounded_channel::<()>();
        let sub = Subscription::new(rx, move || *lock(&counter) += 1);

        drop(sub);
        assert_eq!(*lock(&calls), 1);
    }
}
