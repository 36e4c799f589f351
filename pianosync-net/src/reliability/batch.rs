//! Per-connection outbound queue with batching and bounded growth.
//!
//! Low-priority messages wait in `pending` until the batch is full or the
//! oldest one has waited `max_batch_delay`. A priority frame flushes `pending`
//! ahead of itself, so the transport always sees frames in enqueue order.

use std::collections::VecDeque;
use std::time::Instant;

use pianosync_types::{now_millis, Message, MessageBody};

use crate::config::{BatchingConfig, QueueConfig};
use crate::protocol::{BatchFrame, OutboundFrame};

/// Messages were dropped to keep the queue within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    /// Messages dropped by this push.
    pub dropped: usize,
    /// Queue depth after dropping.
    pub queue_depth: usize,
}

#[derive(Debug)]
struct ReadyFrame {
    frame: OutboundFrame,
    /// Frames that bypassed batching are never dropped.
    critical: bool,
}

impl ReadyFrame {
    fn message_count(&self) -> usize {
        match &self.frame {
            OutboundFrame::Batch(b) => b.messages.len(),
            _ => 1,
        }
    }

    fn messages(&self) -> &[Message] {
        match &self.frame {
            OutboundFrame::Message(m) => std::slice::from_ref(m),
            OutboundFrame::Batch(b) => &b.messages,
            _ => &[],
        }
    }
}

#[derive(Debug)]
pub struct OutboundQueue {
    batching: BatchingConfig,
    max_len: usize,
    pending: VecDeque<Message>,
    oldest_pending_at: Option<Instant>,
    ready: VecDeque<ReadyFrame>,
    dropped_total: u64,
}

impl OutboundQueue {
    pub fn new(batching: BatchingConfig, queue: QueueConfig) -> Self {
        Self {
            batching,
            max_len: queue.max_queue_len.max(1),
            pending: VecDeque::new(),
            oldest_pending_at: None,
            ready: VecDeque::new(),
            dropped_total: 0,
        }
    }

    /// Enqueue a frame. Returns `Some` if older non-critical messages had to
    /// be dropped to stay within the bound.
    pub fn push(&mut self, frame: OutboundFrame, now: Instant) -> Option<Overflow> {
        let batched = frame.priority() < self.batching.priority_threshold;
        match frame {
            OutboundFrame::Message(msg) if batched => {
                self.pending.push_back(msg);
                self.oldest_pending_at.get_or_insert(now);
                if self.pending.len() >= self.batching.max_batch_size {
                    self.flush();
                }
            }
            frame => {
                self.flush();
                self.ready.push_back(ReadyFrame {
                    frame,
                    critical: true,
                });
            }
        }
        self.enforce_bound()
    }

    /// Enqueue a frame ahead of nothing and behind everything, skipping the
    /// bound. Used for the overflow warning itself.
    pub fn push_unbounded(&mut self, frame: OutboundFrame) {
        self.flush();
        self.ready.push_back(ReadyFrame {
            frame,
            critical: true,
        });
    }

    /// Flush the pending batch if its delay has elapsed.
    pub fn poll_flush(&mut self, now: Instant) {
        if let Some(oldest) = self.oldest_pending_at {
            if now.saturating_duration_since(oldest) >= self.batching.max_batch_delay {
                self.flush();
            }
        }
    }

    /// Move everything pending into the ready queue now.
    pub fn flush(&mut self) {
        self.oldest_pending_at = None;
        let frame = match self.pending.len() {
            0 => return,
            1 => match self.pending.pop_front() {
                Some(msg) => OutboundFrame::Message(msg),
                None => return,
            },
            _ => OutboundFrame::Batch(BatchFrame {
                timestamp: now_millis(),
                messages: self.pending.drain(..).collect(),
            }),
        };
        self.ready.push_back(ReadyFrame {
            frame,
            critical: false,
        });
    }

    /// Take all frames ready for the transport, oldest first.
    pub fn drain_ready(&mut self) -> Vec<OutboundFrame> {
        self.ready.drain(..).map(|r| r.frame).collect()
    }

    /// Messages held, pending or ready.
    pub fn depth(&self) -> usize {
        self.pending.len() + self.ready.iter().map(ReadyFrame::message_count).sum::<usize>()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// Drop oldest non-critical messages until within bound. Heartbeats and
    /// superseded snapshots go first; the newest snapshot is never dropped.
    /// Critical frames are kept even if that leaves the queue over the limit.
    fn enforce_bound(&mut self) -> Option<Overflow> {
        let depth = self.depth();
        if depth <= self.max_len {
            return None;
        }

        let mut excess = depth - self.max_len;
        let newest = self.newest_snapshot_version();
        let is_newest = |msg: &Message| {
            matches!(&msg.body, MessageBody::StateSync(sync) if Some(sync.state_version) == newest)
        };

        let mut dropped = self.drop_oldest(&mut excess, |msg| match &msg.body {
            MessageBody::Heartbeat { .. } => true,
            MessageBody::StateSync(_) => !is_newest(msg),
            _ => false,
        });
        dropped += self.drop_oldest(&mut excess, |msg| !is_newest(msg));

        if dropped == 0 {
            return None;
        }
        self.dropped_total += dropped as u64;
        Some(Overflow {
            dropped,
            queue_depth: depth - dropped,
        })
    }

    fn newest_snapshot_version(&self) -> Option<u64> {
        self.ready
            .iter()
            .flat_map(ReadyFrame::messages)
            .chain(self.pending.iter())
            .filter_map(|msg| match &msg.body {
                MessageBody::StateSync(sync) => Some(sync.state_version),
                _ => None,
            })
            .max()
    }

    /// Remove up to `excess` droppable messages, oldest first. Returns how
    /// many were removed.
    fn drop_oldest(&mut self, excess: &mut usize, droppable: impl Fn(&Message) -> bool) -> usize {
        let mut dropped = 0;

        let mut i = 0;
        while *excess > 0 && i < self.ready.len() {
            if self.ready[i].critical {
                i += 1;
                continue;
            }
            let (removed, emptied) = match &mut self.ready[i].frame {
                OutboundFrame::Batch(batch) => {
                    let before = batch.messages.len();
                    let mut budget = *excess;
                    batch.messages.retain(|msg| {
                        if budget > 0 && droppable(msg) {
                            budget -= 1;
                            false
                        } else {
                            true
                        }
                    });
                    (before - batch.messages.len(), batch.messages.is_empty())
                }
                OutboundFrame::Message(msg) if droppable(msg) => (1, true),
                _ => (0, false),
            };
            *excess -= removed;
            dropped += removed;
            if emptied {
                self.ready.remove(i);
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while *excess > 0 && i < self.pending.len() {
            if droppable(&self.pending[i]) {
                self.pending.remove(i);
                *excess -= 1;
                dropped += 1;
            } else {
                i += 1;
            }
        }
        if self.pending.is_empty() {
            self.oldest_pending_at = None;
        }

        dropped
    }
}
