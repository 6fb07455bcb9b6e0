//! A connected caller and its bounded, drop-tolerant outbound queue (§4.4, §5).

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use openkanban_protocol::{Frame, MessageType, SessionId};

/// Numeric connection identity (ground: `ClientId` in the teacher's session
/// state module).
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A bounded outbound queue that never blocks the producer and never
/// silently drops a control frame. When full, a `DATA` push evicts the
/// oldest queued `DATA` frame (coalescing); a control frame push evicts as
/// many oldest `DATA` frames as needed to make room, growing past capacity
/// only if no `DATA` frame remains to evict (control frames themselves are
/// never dropped — §5).
pub struct SubscriberQueue {
    capacity: usize,
    queue: Mutex<VecDeque<Frame>>,
    notify: Notify,
}

impl SubscriberQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
        }
    }

    /// Enqueue `frame`, applying the oldest-DATA-drop policy if at capacity.
    pub async fn push(&self, frame: Frame) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            if frame.msg_type == MessageType::Data {
                if let Some(pos) = queue.iter().position(|f| f.msg_type == MessageType::Data) {
                    queue.remove(pos);
                    debug!(event = "daemon.subscriber_queue.data_frame_dropped");
                }
            } else {
                while queue.len() >= self.capacity {
                    match queue.iter().position(|f| f.msg_type == MessageType::Data) {
                        Some(pos) => {
                            queue.remove(pos);
                            debug!(event = "daemon.subscriber_queue.data_frame_dropped_for_control");
                        }
                        None => break,
                    }
                }
            }
        }
        queue.push_back(frame);
        drop(queue);
        self.notify.notify_one();
    }

    /// Wait for and remove the oldest queued frame.
    pub async fn pop(&self) -> Frame {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(frame) = queue.pop_front() {
                    return frame;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

/// One accepted local-socket or WebSocket client (§4.4). The broker is the
/// sole writer of `attached_session_id`; readers (the connection's own
/// disconnect handling) only ever read it.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub outbound: SubscriberQueue,
    attached_session_id: StdMutex<Option<SessionId>>,
    pub board_subscribed: std::sync::atomic::AtomicBool,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, queue_depth: usize) -> Self {
        Self {
            id,
            outbound: SubscriberQueue::new(queue_depth),
            attached_session_id: StdMutex::new(None),
            board_subscribed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn attached_session(&self) -> Option<SessionId> {
        self.attached_session_id.lock().unwrap().clone()
    }

    /// Only the broker calls this.
    pub(crate) fn set_attached_session(&self, id: Option<SessionId>) {
        *self.attached_session_id.lock().unwrap() = id;
    }

    pub async fn send(&self, frame: Frame) {
        self.outbound.push(frame).await;
    }
}
