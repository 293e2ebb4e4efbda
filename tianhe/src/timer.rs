// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Deadline queue shared by every broker timer.
//!
//! Targets are weak references: a fired timer resolves its target through
//! the owning map and does nothing when the target is gone or its generation
//! moved on. Cancellation is bumping the generation or removing the entry,
//! never touching the queue itself.

use std::collections::BTreeMap;
use tokio::time::Instant;

use codec::TopicName;

use crate::types::{ClientId, EndpointId};

/// What to do when a deadline is reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerTarget {
    /// Erase the session unless it reconnected since the timer was armed.
    SessionExpiry {
        client_id: ClientId,
        generation: u64,
    },

    /// Publish a will whose will-delay elapsed while the session stayed
    /// offline.
    WillDelay {
        client_id: ClientId,
        generation: u64,
    },

    /// Drop a will whose message expiry elapsed before it was published.
    WillExpiry {
        client_id: ClientId,
        generation: u64,
    },

    /// Erase a retained entry whose message expiry elapsed.
    RetainExpiry {
        topic: TopicName,
        generation: u64,
    },

    /// Drop one expired inflight message of an offline session.
    InflightExpiry {
        client_id: ClientId,
        seq: u64,
    },

    /// Drop one expired queued message of an offline session.
    OfflineExpiry {
        client_id: ClientId,
        seq: u64,
    },

    /// Drop an endpoint that never completed CONNECT.
    ConnectTimeout {
        endpoint_id: EndpointId,
    },

    /// Run the delayed close of a disconnected endpoint.
    CloseDelay {
        endpoint_id: EndpointId,
    },
}

/// All broker deadlines ordered by expiry instant.
///
/// The key carries a sequence number so identical instants never collide.
#[derive(Debug, Default)]
pub struct TimerQueue {
    deadlines: BTreeMap<(Instant, u64), TimerTarget>,
    next_key: u64,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Instant, target: TimerTarget) {
        self.next_key += 1;
        self.deadlines.insert((deadline, self.next_key), target);
    }

    /// Earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().map(|(instant, _)| *instant)
    }

    /// Remove and return every target whose deadline is not after `now`,
    /// in deadline order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerTarget> {
        let mut due = Vec::new();
        while let Some((&(deadline, key), _)) = self.deadlines.iter().next() {
            if deadline > now {
                break;
            }
            if let Some(target) = self.deadlines.remove(&(deadline, key)) {
                due.push(target);
            }
        }
        due
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
