//! Bounded per-command message queues with deadlines and shutdown
//! propagation

use crate::envelope::NetworkEnvelope;
use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct QueueState {
    messages: VecDeque<NetworkEnvelope>,
    shutdown: bool,
}

/// A bounded FIFO of parsed envelopes for one command. Overflow drops the
/// newest message and logs.
pub struct CommandQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                shutdown: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue one envelope. Returns false when the queue is full and the
    /// message was dropped.
    pub fn push(&self, envelope: NetworkEnvelope) -> bool {
        let mut state = self.state.lock().expect("queue lock");
        if state.shutdown {
            return false;
        }
        if state.messages.len() >= self.capacity {
            tracing::warn!(
                command = %envelope.command,
                capacity = self.capacity,
                "queue full, dropping message"
            );
            return false;
        }
        state.messages.push_back(envelope);
        self.ready.notify_one();
        true
    }

    /// Wait up to `timeout` for the next envelope. Expiry yields
    /// `Timeout`; a shutdown while waiting yields `ConnectionClosed`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<NetworkEnvelope> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("queue lock");
        loop {
            if let Some(envelope) = state.messages.pop_front() {
                return Ok(envelope);
            }
            if state.shutdown {
                return Err(Error::ConnectionClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("message".to_string()));
            }
            let (next, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .expect("queue lock");
            state = next;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<NetworkEnvelope> {
        self.state
            .lock()
            .expect("queue lock")
            .messages
            .pop_front()
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().expect("queue lock");
        state.shutdown = true;
        self.ready.notify_all();
    }
}

/// Routes parsed envelopes into one bounded queue per command. Queues are
/// created on first use.
pub struct MessageRouter {
    queues: Mutex<HashMap<String, Arc<CommandQueue>>>,
    capacity: usize,
}

impl MessageRouter {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// The queue for a command, created on demand.
    pub fn queue(&self, command: &str) -> Arc<CommandQueue> {
        let mut queues = self.queues.lock().expect("router lock");
        queues
            .entry(command.to_string())
            .or_insert_with(|| Arc::new(CommandQueue::new(self.capacity)))
            .clone()
    }

    /// Deliver an envelope to its command queue. Returns false when the
    /// message was dropped.
    pub fn route(&self, envelope: NetworkEnvelope) -> bool {
        self.queue(&envelope.command).push(envelope)
    }

    /// Wait for the next envelope of a given command.
    pub fn wait_for(&self, command: &str, timeout: Duration) -> Result<NetworkEnvelope> {
        self.queue(command).recv_timeout(timeout)
    }

    /// Signal shutdown into every queue; blocked receivers return
    /// `ConnectionClosed`.
    pub fn shutdown(&self) {
        let queues = self.queues.lock().expect("router lock");
        for queue in queues.values() {
            queue.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn envelope(command: &str) -> NetworkEnvelope {
        NetworkEnvelope::new(command, Vec::new(), false).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new(8);
        queue.push(NetworkEnvelope::new("ping", vec![1], false).unwrap());
        queue.push(NetworkEnvelope::new("ping", vec![2], false).unwrap());
        assert_eq!(queue.try_recv().unwrap().payload, vec![1]);
        assert_eq!(queue.try_recv().unwrap().payload, vec![2]);
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn test_timeout_when_empty() {
        let queue = CommandQueue::new(4);
        let result = queue.recv_timeout(Duration::from_millis(10));
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_overflow_drops() {
        let queue = CommandQueue::new(1);
        assert!(queue.push(envelope("headers")));
        assert!(!queue.push(envelope("headers")));
    }

    #[test]
    fn test_shutdown_unblocks_receiver() {
        let router = Arc::new(MessageRouter::new(4));
        let waiter = router.clone();
        let handle = thread::spawn(move || waiter.wait_for("headers", Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        router.shutdown();
        assert!(matches!(handle.join().unwrap(), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_route_by_command() {
        let router = MessageRouter::new(4);
        assert!(router.route(envelope("ping")));
        assert!(router.route(envelope("headers")));
        assert_eq!(
            router
                .wait_for("ping", Duration::from_millis(10))
                .unwrap()
                .command,
            "ping"
        );
        assert_eq!(
            router
                .wait_for("headers", Duration::from_millis(10))
                .unwrap()
                .command,
            "headers"
        );
    }

    #[test]
    fn test_cross_thread_delivery() {
        let router = Arc::new(MessageRouter::new(4));
        let sender = router.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sender.route(envelope("pong"));
        });
        let received = router.wait_for("pong", Duration::from_secs(5)).unwrap();
        assert_eq!(received.command, "pong");
    }
}
