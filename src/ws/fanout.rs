//! Correlation of socket replies to the requests waiting on them.
//!
//! Every outbound request takes a fresh id from [`Fanout::register`] and waits on a one-shot
//! slot. The read loop hands each reply to [`Fanout::publish`], which in a single pass delivers
//! to the matching waiter and evicts every waiter whose deadline has passed, so no per-request
//! timer has to clean up after abandoned requests.

use std::mem;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::frame::Message;

/// Outcome of waiting on a [`PendingRequest`].
#[non_exhaustive]
#[derive(Debug)]
pub enum Delivery {
    /// The reply arrived
    Delivered(Message),
    /// The deadline passed, or the waiter was evicted without a reply
    TimedOut,
    /// The connection was torn down while waiting
    ConnectionLost,
}

/// Handle held by the caller of an outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    id: u64,
    deadline: Instant,
    slot: oneshot::Receiver<Message>,
}

impl PendingRequest {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Suspends until the reply is delivered, the deadline passes, or `connection` is cancelled.
    ///
    /// Callers wanting a shorter bound can simply drop this future; the waiter is then evicted
    /// by the next [`Fanout::publish`] after its deadline.
    ///
    /// A reply already sitting in the slot is returned even if the connection has since been
    /// torn down.
    pub async fn wait(self, connection: &CancellationToken) -> Delivery {
        tokio::select! {
            biased;

            result = self.slot => match result {
                Ok(msg) => Delivery::Delivered(msg),
                // Sender dropped: evicted past its deadline, or drained on teardown
                Err(_) if connection.is_cancelled() => Delivery::ConnectionLost,
                Err(_) => Delivery::TimedOut,
            },
            () = connection.cancelled() => Delivery::ConnectionLost,
            () = sleep_until(self.deadline) => Delivery::TimedOut,
        }
    }
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    deadline: Instant,
    slot: oneshot::Sender<Message>,
}

#[derive(Debug)]
struct State {
    next_id: u64,
    waiters: Vec<Waiter>,
}

/// The set of requests awaiting a reply on one connection.
#[derive(Debug)]
pub struct Fanout {
    timeout: Duration,
    state: Mutex<State>,
}

impl Fanout {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(State {
                next_id: 1,
                waiters: Vec::new(),
            }),
        }
    }

    /// Allocates the next id and registers a waiter using the default request timeout.
    pub fn register(&self) -> PendingRequest {
        self.register_with_timeout(self.timeout)
    }

    /// Allocates the next id and registers a waiter that expires after `timeout`.
    pub fn register_with_timeout(&self, timeout: Duration) -> PendingRequest {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.waiters.push(Waiter {
            id,
            deadline,
            slot: tx,
        });

        PendingRequest {
            id,
            deadline,
            slot: rx,
        }
    }

    /// Delivers `msg` to the waiter registered under `msg.id`, evicting expired waiters on the
    /// way. Returns whether the message found its waiter.
    ///
    /// Survivors keep their relative order. A message whose id matches nothing (a straggler
    /// after its waiter was evicted) is dropped.
    pub fn publish(&self, msg: Message) -> bool {
        let now = Instant::now();
        let mut msg = Some(msg);

        let mut state = self.state.lock();
        let waiters = mem::take(&mut state.waiters);
        let mut survivors = Vec::with_capacity(waiters.len());

        for waiter in waiters {
            if waiter.deadline <= now {
                #[cfg(feature = "tracing")]
                tracing::debug!(id = waiter.id, "evicting request past its deadline");
                continue;
            }

            match msg.take_if(|m| m.id == waiter.id) {
                Some(m) => {
                    // A closed receiver means the caller stopped waiting
                    _ = waiter.slot.send(m);
                }
                None => survivors.push(waiter),
            }
        }

        state.waiters = survivors;
        drop(state);

        #[cfg(feature = "tracing")]
        if let Some(m) = &msg {
            tracing::warn!(id = m.id, status = m.status, "dropping reply with no pending request");
        }

        msg.is_none()
    }

    /// Removes the waiter for `id` without delivering to it.
    pub fn cancel(&self, id: u64) {
        self.state.lock().waiters.retain(|w| w.id != id);
    }

    /// Drops every waiter; used when the connection is torn down.
    pub fn drain(&self) {
        let waiters = mem::take(&mut self.state.lock().waiters);

        #[cfg(feature = "tracing")]
        if !waiters.is_empty() {
            tracing::debug!(count = waiters.len(), "failing outstanding requests");
        }

        drop(waiters);
    }

    /// Number of requests still awaiting a reply.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::ws::frame::EventKind;

    fn reply(id: u64) -> Message {
        Message::new(EventKind::Unsolicited, id, 200, r#"{"ok":true}"#).unwrap()
    }

    /// Inserts a waiter with an arbitrary id, bypassing the counter.
    fn insert(fanout: &Fanout, id: u64, deadline: Instant) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        fanout.state.lock().waiters.push(Waiter {
            id,
            deadline,
            slot: tx,
        });
        rx
    }

    fn ids(fanout: &Fanout) -> Vec<u64> {
        fanout.state.lock().waiters.iter().map(|w| w.id).collect()
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let fanout = Fanout::new(Duration::from_secs(5));

        let ids: Vec<u64> = (0..4).map(|_| fanout.register().id()).collect();

        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(fanout.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_yields_distinct_ids() {
        let fanout = Arc::new(Fanout::new(Duration::from_secs(5)));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let fanout = Arc::clone(&fanout);
                tokio::spawn(async move {
                    (0..16).map(|_| fanout.register().id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids increase per task");
            for id in ids {
                assert!(all.insert(id), "id {id} allocated twice");
            }
        }

        assert_eq!(all.len(), 64 * 16);
        assert_eq!(all.iter().min(), Some(&1));
        assert_eq!(all.iter().max(), Some(&(64 * 16)));
    }

    #[test]
    fn publish_on_empty_is_a_no_op() {
        let fanout = Fanout::new(Duration::from_secs(5));
        assert!(!fanout.publish(reply(0)));
        assert!(fanout.is_empty());
    }

    #[test]
    fn publish_evicts_expired_waiter_without_match() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let mut rx = insert(&fanout, 1, Instant::now());

        assert!(!fanout.publish(reply(0)));

        assert!(fanout.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn publish_delivers_and_removes() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let pending = fanout.register();
        let mut slot = pending.slot;

        assert!(fanout.publish(reply(pending.id)));

        assert!(fanout.is_empty());
        assert_eq!(slot.try_recv().unwrap().id, 1);
    }

    #[test]
    fn publish_is_stable_in_removal() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let future = Instant::now() + Duration::from_secs(1);
        let receivers: Vec<_> = (1..=6).map(|id| insert(&fanout, id, future)).collect();

        assert!(fanout.publish(reply(4)));

        assert_eq!(ids(&fanout), vec![1, 2, 3, 5, 6]);
        drop(receivers);
    }

    #[test]
    fn publish_evicts_expired_and_matched_in_one_pass() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let future = Instant::now() + Duration::from_secs(1);
        let past = Instant::now();

        let layout: &[(u64, bool)] = &[
            (1, true),
            (2, true),
            (93452, false),
            (3, true),
            (56592, false),
            (4, true),
            (9122, false),
            (5, true),
            (6, true),
        ];
        let mut receivers = Vec::new();
        for &(id, valid) in layout {
            receivers.push((id, insert(&fanout, id, if valid { future } else { past })));
        }

        assert!(fanout.publish(reply(4)));

        assert_eq!(ids(&fanout), vec![1, 2, 3, 5, 6]);
        for (id, mut rx) in receivers {
            match id {
                4 => assert_eq!(rx.try_recv().unwrap().id, 4),
                1 | 2 | 3 | 5 | 6 => assert!(matches!(
                    rx.try_recv(),
                    Err(oneshot::error::TryRecvError::Empty)
                )),
                _ => assert!(matches!(
                    rx.try_recv(),
                    Err(oneshot::error::TryRecvError::Closed)
                )),
            }
        }
    }

    #[test]
    fn publish_delivers_at_most_once() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let future = Instant::now() + Duration::from_secs(1);
        let mut first = insert(&fanout, 21, future);
        let mut second = insert(&fanout, 21, future);

        assert!(fanout.publish(reply(21)));

        assert!(first.try_recv().is_ok(), "first waiter receives");
        assert!(second.try_recv().is_err(), "second waiter does not");
        assert_eq!(ids(&fanout), vec![21]);

        assert!(!fanout.publish(reply(4)), "no match for a straggler");
        assert_eq!(ids(&fanout), vec![21]);
    }

    #[test]
    fn cancel_and_drain_remove_waiters() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let a = fanout.register();
        let _b = fanout.register();

        fanout.cancel(a.id());
        assert_eq!(ids(&fanout), vec![2]);

        fanout.drain();
        assert!(fanout.is_empty());
    }

    #[tokio::test]
    async fn wait_returns_delivered_message() {
        let fanout = Arc::new(Fanout::new(Duration::from_secs(5)));
        let token = CancellationToken::new();
        let pending = fanout.register();
        let id = pending.id();

        let publisher = Arc::clone(&fanout);
        tokio::spawn(async move { publisher.publish(reply(id)) });

        match pending.wait(&token).await {
            Delivery::Delivered(msg) => assert_eq!(msg.id, id),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_after_deadline() {
        let fanout = Fanout::new(Duration::from_millis(50));
        let token = CancellationToken::new();

        let pending = fanout.register();
        assert!(matches!(pending.wait(&token).await, Delivery::TimedOut));

        // The waiter lingers until the next publish evicts it
        assert_eq!(fanout.len(), 1);
        assert!(!fanout.publish(reply(1)));
        assert!(fanout.is_empty());
    }

    #[tokio::test]
    async fn wait_fails_when_connection_is_cancelled() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let token = CancellationToken::new();
        let pending = fanout.register();

        token.cancel();
        fanout.drain();

        assert!(matches!(
            pending.wait(&token).await,
            Delivery::ConnectionLost
        ));
    }

    #[tokio::test]
    async fn wait_returns_reply_delivered_before_teardown() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let token = CancellationToken::new();
        let pending = fanout.register();
        let id = pending.id();

        assert!(fanout.publish(reply(id)));
        token.cancel();
        fanout.drain();

        match pending.wait(&token).await {
            Delivery::Delivered(msg) => assert_eq!(msg.id, id),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_fails_on_cancel_before_drain() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let token = CancellationToken::new();
        let pending = fanout.register();

        token.cancel();

        assert!(matches!(
            pending.wait(&token).await,
            Delivery::ConnectionLost
        ));
        assert_eq!(fanout.len(), 1, "cleanup is left to drain");
    }

    #[tokio::test]
    async fn late_reply_after_eviction_is_dropped() {
        let fanout = Fanout::new(Duration::from_secs(5));
        let token = CancellationToken::new();
        let expired = fanout.register_with_timeout(Duration::ZERO);
        let id = expired.id();

        assert!(!fanout.publish(reply(999)));
        assert!(matches!(expired.wait(&token).await, Delivery::TimedOut));
        assert!(!fanout.publish(reply(id)));
    }
}
