//! Deduplicating work channel
//!
//! A single bounded queue feeding a pool of worker receivers. Sending an
//! item that is already queued but not yet picked up is a no-op, so
//! producers can enqueue the same unit of work as often as they like and
//! workers still process it once per "wave".
//!
//! [`Receiver`]s clone cheaply and pull from the same queue, so cloning is
//! how a worker pool load-balances. When the queue is at capacity new items
//! are dropped and some receiver is told about it via [`RecvError::Lagging`].
//!
//! Created with [`channel`]; the queue closes when either side is fully
//! dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::{cmp, fmt, hash};

use snafu::Snafu;
use tokio::sync::Notify;

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum RecvError {
    /// All senders are gone and the queue has been drained.
    Closed,
    /// Items were dropped because the queue was at capacity.
    Lagging,
}

pub enum SendError<T> {
    Closed(T),
    Lagging(T),
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SendError::Closed(_) => "SendError::Closed",
            SendError::Lagging(_) => "SendError::Lagging",
        })
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Debug>::fmt(self, f)
    }
}

impl<T> std::error::Error for SendError<T> {}

struct Inner<T> {
    set: HashSet<T>,
    queue: VecDeque<T>,
    dropped_items: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
    sender_count: AtomicUsize,
    receiver_count: AtomicUsize,
}

/// Create a deduplicating queue holding at most `capacity` pending items.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>)
where
    T: cmp::Eq + hash::Hash + Clone,
{
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            set: HashSet::new(),
            queue: VecDeque::new(),
            dropped_items: false,
        }),
        notify: Notify::new(),
        capacity,
        sender_count: AtomicUsize::new(1),
        receiver_count: AtomicUsize::new(1),
    });

    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T>
where
    T: cmp::Eq + hash::Hash + Clone,
{
    /// Queue an item unless an equal one is already pending.
    ///
    /// Returns [`SendError::Lagging`] when the queue is at capacity; the
    /// item is dropped and some receiver will observe the gap.
    pub fn send(&self, v: T) -> std::result::Result<(), SendError<T>> {
        if self.shared.receiver_count.load(Ordering::Acquire) == 0 {
            return Err(SendError::Closed(v));
        }

        let mut lock = self.shared.inner.lock().expect("locking failed");

        if lock.set.contains(&v) {
            return Ok(());
        }

        if self.shared.capacity <= lock.queue.len() {
            lock.dropped_items = true;
            drop(lock);
            self.shared.notify.notify_one();
            return Err(SendError::Lagging(v));
        }

        lock.set.insert(v.clone());
        lock.queue.push_back(v);
        drop(lock);

        self.shared.notify.notify_one();
        Ok(())
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.sender_count.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.sender_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.notify.notify_waiters();
        }
    }
}

/// A worker handle pulling from the shared queue.
///
/// Clones pull from the same queue; each queued item is delivered to
/// exactly one of them.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T>
where
    T: cmp::Eq + hash::Hash,
{
    pub async fn recv(&mut self) -> std::result::Result<T, RecvError> {
        loop {
            // The `notified` future must be created before checking the
            // queue, otherwise a send landing between the check and the
            // await is lost.
            let notified = self.shared.notify.notified();

            {
                let mut lock = self.shared.inner.lock().expect("locking failed");

                if let Some(v) = lock.queue.pop_front() {
                    if !lock.set.remove(&v) {
                        panic!("Queued item must be in the dedup set");
                    }
                    // Wake another worker in case more items are pending.
                    if !lock.queue.is_empty() {
                        self.shared.notify.notify_one();
                    }
                    return Ok(v);
                }

                if lock.dropped_items {
                    lock.dropped_items = false;
                    return Err(RecvError::Lagging);
                }

                if self.shared.sender_count.load(Ordering::Acquire) == 0 {
                    return Err(RecvError::Closed);
                }
            }

            notified.await;
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.receiver_count.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests;
