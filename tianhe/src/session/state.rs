// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use codec::{PacketId, Will};

use crate::endpoint::{StoredMessage, TopicAliasRecv};
use crate::trie::{SubscriptionHandle, SubscriptionMap};
use crate::types::{ClientId, EndpointId, PublishMessage};

/// A QoS 1/2 message drained from a closing endpoint, awaiting
/// re-transmission on the next connection of this session.
#[derive(Debug)]
pub struct InflightMessage {
    pub seq: u64,
    pub message: StoredMessage,

    /// Deadline after which the message is dropped instead of re-sent.
    pub expiry_at: Option<Instant>,
}

/// A message published to an offline session, delivered in FIFO order on
/// resumption.
#[derive(Debug)]
pub struct OfflineMessage {
    pub seq: u64,
    pub message: PublishMessage,
    pub expiry_at: Option<Instant>,
}

/// The will attached to the current or latest connection of a session.
#[derive(Debug)]
pub struct SessionWill {
    pub will: Will,

    /// Deadline from the will's message expiry interval; a will still
    /// unpublished past it is dropped.
    pub expiry_at: Option<Instant>,

    /// Interval from the will's will-delay property.
    pub delay: Option<Duration>,

    /// Set once a will-delay timer has been armed for this will; the will
    /// is then published by the timer or at session end, whichever comes
    /// first.
    pub delay_pending: bool,
}

/// Session state persisting across the connections of one client id.
///
/// Holds the client's subscriptions, the QoS 1/2 messages that have been
/// sent but not completely acknowledged, messages pending transmission, QoS
/// 2 exchanges received but not completed, the will, and the receive side
/// topic alias table.
#[derive(Debug, Default)]
pub struct SessionState {
    client_id: ClientId,

    /// Present while online; exactly one live connection references this
    /// session.
    endpoint_id: Option<EndpointId>,

    /// None means the session ends when the connection closes.
    session_expiry_interval: Option<Duration>,

    /// Bumped whenever the session expiry timer is armed or cancelled; a
    /// timer firing with a stale generation is a no-op.
    expiry_generation: u64,

    will: Option<SessionWill>,

    /// Guards will timers the same way `expiry_generation` guards session
    /// expiry.
    will_generation: u64,

    /// Handles into the subscription map, for O(1) removal.
    handles: HashSet<SubscriptionHandle>,

    inflight_messages: VecDeque<InflightMessage>,

    offline_messages: VecDeque<OfflineMessage>,

    /// Packet ids of QoS 2 publishes received and not yet released;
    /// a re-sent PUBLISH with one of these ids is answered but not
    /// re-dispatched.
    qos2_received: HashSet<PacketId>,

    /// Alias table preserved across reconnects. Alias lifetime equal to
    /// session lifetime differs from the letter of the 5.0 spec but is the
    /// practical choice.
    topic_alias_recv: Option<TopicAliasRecv>,

    next_message_seq: u64,
}

impl SessionState {
    #[must_use]
    pub fn new(client_id: &str, endpoint_id: EndpointId) -> Self {
        Self {
            client_id: client_id.to_string(),
            endpoint_id: Some(endpoint_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn online(&self) -> bool {
        self.endpoint_id.is_some()
    }

    #[must_use]
    pub const fn endpoint_id(&self) -> Option<EndpointId> {
        self.endpoint_id
    }

    pub fn set_endpoint_id(&mut self, endpoint_id: Option<EndpointId>) {
        self.endpoint_id = endpoint_id;
    }

    #[must_use]
    pub const fn session_expiry_interval(&self) -> Option<Duration> {
        self.session_expiry_interval
    }

    pub fn set_session_expiry_interval(&mut self, interval: Option<Duration>) {
        self.session_expiry_interval = interval;
    }

    #[must_use]
    pub const fn expiry_generation(&self) -> u64 {
        self.expiry_generation
    }

    /// Invalidate any armed session expiry timer and return the generation
    /// a new timer must carry.
    pub fn bump_expiry_generation(&mut self) -> u64 {
        self.expiry_generation += 1;
        self.expiry_generation
    }

    #[must_use]
    pub const fn will(&self) -> Option<&SessionWill> {
        self.will.as_ref()
    }

    pub fn will_mut(&mut self) -> Option<&mut SessionWill> {
        self.will.as_mut()
    }

    pub fn take_will(&mut self) -> Option<SessionWill> {
        self.will.take()
    }

    #[must_use]
    pub const fn will_generation(&self) -> u64 {
        self.will_generation
    }

    /// Replace the will, invalidating timers armed for the previous one.
    /// Returns the generation new will timers must carry.
    pub fn update_will(&mut self, will: Option<SessionWill>) -> u64 {
        self.will = will;
        self.will_generation += 1;
        self.will_generation
    }

    /// Drop the will and invalidate its timers.
    pub fn reset_will(&mut self) {
        self.will = None;
        self.will_generation += 1;
    }

    pub fn handles(&self) -> impl Iterator<Item = &SubscriptionHandle> {
        self.handles.iter()
    }

    #[must_use]
    pub fn has_handle(&self, handle: SubscriptionHandle) -> bool {
        self.handles.contains(&handle)
    }

    pub fn insert_handle(&mut self, handle: SubscriptionHandle) {
        self.handles.insert(handle);
    }

    pub fn remove_handle(&mut self, handle: SubscriptionHandle) -> bool {
        self.handles.remove(&handle)
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.handles.len()
    }

    pub fn next_message_seq(&mut self) -> u64 {
        self.next_message_seq += 1;
        self.next_message_seq
    }

    pub fn push_inflight_message(&mut self, message: InflightMessage) {
        self.inflight_messages.push_back(message);
    }

    /// Drain inflight messages in the order they were stored.
    pub fn take_inflight_messages(&mut self) -> VecDeque<InflightMessage> {
        std::mem::take(&mut self.inflight_messages)
    }

    pub fn remove_inflight_message(&mut self, seq: u64) -> bool {
        let before = self.inflight_messages.len();
        self.inflight_messages.retain(|m| m.seq != seq);
        self.inflight_messages.len() != before
    }

    #[must_use]
    pub fn inflight_len(&self) -> usize {
        self.inflight_messages.len()
    }

    pub fn push_offline_message(&mut self, message: OfflineMessage) {
        self.offline_messages.push_back(message);
    }

    /// Drain queued messages in FIFO order.
    pub fn take_offline_messages(&mut self) -> VecDeque<OfflineMessage> {
        std::mem::take(&mut self.offline_messages)
    }

    pub fn remove_offline_message(&mut self, seq: u64) -> bool {
        let before = self.offline_messages.len();
        self.offline_messages.retain(|m| m.seq != seq);
        self.offline_messages.len() != before
    }

    #[must_use]
    pub fn offline_len(&self) -> usize {
        self.offline_messages.len()
    }

    pub fn insert_qos2_received(&mut self, packet_id: PacketId) {
        self.qos2_received.insert(packet_id);
    }

    #[must_use]
    pub fn has_qos2_received(&self, packet_id: PacketId) -> bool {
        self.qos2_received.contains(&packet_id)
    }

    pub fn remove_qos2_received(&mut self, packet_id: PacketId) -> bool {
        self.qos2_received.remove(&packet_id)
    }

    pub fn set_topic_alias_recv(&mut self, table: TopicAliasRecv) {
        if table.is_empty() {
            self.topic_alias_recv = None;
        } else {
            self.topic_alias_recv = Some(table);
        }
    }

    pub fn take_topic_alias_recv(&mut self) -> Option<TopicAliasRecv> {
        self.topic_alias_recv.take()
    }

    /// Remove every subscription this session holds from the subscription
    /// map.
    pub fn unsubscribe_all(&mut self, subs_map: &mut SubscriptionMap) {
        for handle in self.handles.drain() {
            subs_map.erase(handle, &self.client_id);
        }
    }

    /// Discard all session state except the client id and connection,
    /// unsubscribing everything. Used by clean-start and session erasure.
    pub fn clean(&mut self, subs_map: &mut SubscriptionMap) {
        self.topic_alias_recv = None;
        self.inflight_messages.clear();
        self.offline_messages.clear();
        self.qos2_received.clear();
        self.bump_expiry_generation();
        self.reset_will();
        self.unsubscribe_all(subs_map);
    }
}
