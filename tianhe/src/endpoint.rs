// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Broker side record of one accepted connection.
//!
//! The endpoint owns everything scoped to a single network connection:
//! the outbound packet pipe, packet id allocation, the store of outbound
//! QoS 1/2 messages not yet fully acknowledged, and the receive side topic
//! alias table. Session state that outlives the connection lives in the
//! session store instead.

use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;

use codec::v5::Properties;
use codec::{v3, v5, Packet, PacketId, ProtocolLevel, TopicName};

use crate::error::{Error, ErrorKind};
use crate::types::{ClientId, EndpointId, PublishMessage};

/// Allocates packet ids unique among this endpoint's outbound QoS > 0
/// exchanges.
///
/// An id stays reserved from allocation until the final ack of its exchange
/// releases it.
#[derive(Debug, Default)]
pub struct PacketIdPool {
    next: PacketId,
    used: HashSet<PacketId>,
}

impl PacketIdPool {
    /// Allocate the next free id, or None when all 65535 ids are in flight.
    pub fn acquire(&mut self) -> Option<PacketId> {
        if self.used.len() >= usize::from(PacketId::MAX) {
            return None;
        }
        loop {
            self.next = self.next.wrapping_add(1);
            if self.next == 0 {
                continue;
            }
            if self.used.insert(self.next) {
                return Some(self.next);
            }
        }
    }

    /// Mark an id allocated by an earlier connection as in use, when
    /// restoring inflight messages into this endpoint.
    pub fn register(&mut self, packet_id: PacketId) {
        self.used.insert(packet_id);
    }

    pub fn release(&mut self, packet_id: PacketId) {
        self.used.remove(&packet_id);
    }

    #[must_use]
    pub fn contains(&self, packet_id: PacketId) -> bool {
        self.used.contains(&packet_id)
    }
}

/// Receive side topic alias table of one connection.
///
/// Alias mappings must not be carried from one network connection to
/// another; the broker instead keeps the table with the session, which is a
/// practical choice shared with other broker implementations.
#[derive(Clone, Debug, Default)]
pub struct TopicAliasRecv {
    map: HashMap<u16, TopicName>,
}

impl TopicAliasRecv {
    pub fn insert(&mut self, alias: u16, topic: TopicName) {
        self.map.insert(alias, topic);
    }

    #[must_use]
    pub fn resolve(&self, alias: u16) -> Option<&TopicName> {
        self.map.get(&alias)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// An outbound QoS 1/2 message awaiting acknowledgement.
#[derive(Clone, Debug)]
pub enum StoredMessage {
    /// PUBLISH sent, awaiting PUBACK (QoS 1) or PUBREC (QoS 2).
    Publish {
        packet_id: PacketId,
        message: PublishMessage,
    },

    /// PUBREL sent, awaiting PUBCOMP.
    Release { packet_id: PacketId },
}

impl StoredMessage {
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        match self {
            Self::Publish { packet_id, .. } | Self::Release { packet_id } => *packet_id,
        }
    }
}

#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,

    sender: UnboundedSender<Packet>,

    /// Known once the CONNECT packet has been handled.
    protocol: Option<ProtocolLevel>,

    client_id: Option<ClientId>,

    /// clean-session flag of a 3.1.1 CONNECT; decides session retention
    /// on close.
    clean_session: bool,

    keep_alive: u16,

    /// DISCONNECT received; the will is suppressed on close.
    disconnected: bool,

    /// When false the broker does not answer PUBREC with PUBREL nor PUBREL
    /// with PUBCOMP on this endpoint. For tests only.
    auto_response: bool,

    packet_ids: PacketIdPool,

    /// Outbound QoS 1/2 messages not yet fully acknowledged, in send order.
    store: Vec<StoredMessage>,

    topic_alias_recv: TopicAliasRecv,
}

impl Endpoint {
    #[must_use]
    pub fn new(id: EndpointId, sender: UnboundedSender<Packet>) -> Self {
        Self {
            id,
            sender,
            protocol: None,
            client_id: None,
            clean_session: true,
            keep_alive: 0,
            disconnected: false,
            auto_response: true,
            packet_ids: PacketIdPool::default(),
            store: Vec::new(),
            topic_alias_recv: TopicAliasRecv::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> EndpointId {
        self.id
    }

    #[must_use]
    pub const fn protocol(&self) -> Option<ProtocolLevel> {
        self.protocol
    }

    /// Whether the CONNECT handshake completed on this endpoint.
    #[must_use]
    pub const fn connected(&self) -> bool {
        self.protocol.is_some()
    }

    pub fn set_connect_info(
        &mut self,
        protocol: ProtocolLevel,
        client_id: &str,
        clean_session: bool,
        keep_alive: u16,
    ) {
        self.protocol = Some(protocol);
        self.client_id = Some(client_id.to_string());
        self.clean_session = clean_session;
        self.keep_alive = keep_alive;
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn set_disconnected(&mut self) {
        self.disconnected = true;
    }

    #[must_use]
    pub const fn auto_response(&self) -> bool {
        self.auto_response
    }

    pub fn set_auto_response(&mut self, auto_response: bool) {
        self.auto_response = auto_response;
    }

    pub fn topic_alias_recv(&mut self) -> &mut TopicAliasRecv {
        &mut self.topic_alias_recv
    }

    /// Move the receive side alias table out, when the session goes
    /// offline.
    pub fn take_topic_alias_recv(&mut self) -> TopicAliasRecv {
        std::mem::take(&mut self.topic_alias_recv)
    }

    /// Restore the alias table preserved in the session, on resumption.
    pub fn restore_topic_alias_recv(&mut self, table: TopicAliasRecv) {
        self.topic_alias_recv = table;
    }

    /// Push one packet into the outbound pipe.
    ///
    /// # Errors
    ///
    /// Returns error if the transport side of the pipe is gone.
    pub fn send(&self, packet: Packet) -> Result<(), Error> {
        self.sender.send(packet).map_err(|err| {
            Error::from_string(
                ErrorKind::SendError,
                format!("endpoint: Failed to send packet to {}, err: {err}", self.id),
            )
        })
    }

    /// Send an application message to the client.
    ///
    /// For QoS > 0 a packet id is allocated and the message is recorded in
    /// the store until the exchange completes. Properties are dropped for
    /// 3.1.1 connections.
    ///
    /// # Errors
    ///
    /// Returns error if packet ids are exhausted or the pipe is gone.
    pub fn publish_message(&mut self, message: &PublishMessage) -> Result<(), Error> {
        let packet_id = if message.options.qos() == codec::QoS::AtMostOnce {
            None
        } else {
            let packet_id = self.packet_ids.acquire().ok_or_else(|| {
                Error::from_string(
                    ErrorKind::PacketIdExhausted,
                    format!("endpoint: No free packet id on {}", self.id),
                )
            })?;
            self.store.push(StoredMessage::Publish {
                packet_id,
                message: message.clone(),
            });
            Some(packet_id)
        };
        self.send_publish(message, packet_id, false)
    }

    /// Re-send a message stored by a previous connection of this session
    /// and record it in the store again. Re-sent publishes carry the dup
    /// flag and keep their original packet id.
    ///
    /// # Errors
    ///
    /// Returns error if the pipe is gone.
    pub fn send_store_message(&mut self, stored: StoredMessage) -> Result<(), Error> {
        match &stored {
            StoredMessage::Publish { packet_id, message } => {
                self.packet_ids.register(*packet_id);
                self.send_publish(message, Some(*packet_id), true)?;
            }
            StoredMessage::Release { packet_id } => {
                self.packet_ids.register(*packet_id);
                self.send_release(*packet_id, Properties::new())?;
            }
        }
        self.store.push(stored);
        Ok(())
    }

    /// Erase the stored PUBLISH for `packet_id` and release the id.
    ///
    /// Returns false when no such entry exists, which indicates an
    /// unexpected ack from the client.
    pub fn ack_publish(&mut self, packet_id: PacketId) -> bool {
        let pos = self
            .store
            .iter()
            .position(|m| matches!(m, StoredMessage::Publish { packet_id: id, .. } if *id == packet_id));
        match pos {
            Some(pos) => {
                self.store.remove(pos);
                self.packet_ids.release(packet_id);
                true
            }
            None => false,
        }
    }

    /// Replace the stored PUBLISH for `packet_id` with a stored PUBREL,
    /// keeping the packet id reserved. Second step of the sender side QoS 2
    /// exchange.
    pub fn publish_released(&mut self, packet_id: PacketId) -> bool {
        let pos = self
            .store
            .iter()
            .position(|m| matches!(m, StoredMessage::Publish { packet_id: id, .. } if *id == packet_id));
        match pos {
            Some(pos) => {
                self.store[pos] = StoredMessage::Release { packet_id };
                true
            }
            None => false,
        }
    }

    /// Erase the stored PUBREL for `packet_id` and release the id. Final
    /// step of the sender side QoS 2 exchange.
    pub fn ack_release(&mut self, packet_id: PacketId) -> bool {
        let pos = self
            .store
            .iter()
            .position(|m| matches!(m, StoredMessage::Release { packet_id: id } if *id == packet_id));
        match pos {
            Some(pos) => {
                self.store.remove(pos);
                self.packet_ids.release(packet_id);
                true
            }
            None => false,
        }
    }

    /// Drain the store, in send order. Used when the session goes offline.
    pub fn take_store(&mut self) -> Vec<StoredMessage> {
        std::mem::take(&mut self.store)
    }

    fn send_publish(
        &self,
        message: &PublishMessage,
        packet_id: Option<PacketId>,
        dup: bool,
    ) -> Result<(), Error> {
        let mut options = message.options;
        options.set_dup(dup);
        let packet = match self.protocol {
            Some(ProtocolLevel::V5) => {
                let mut packet = v5::PublishPacket::with_topic(
                    message.topic.clone(),
                    options,
                    message.payload.clone(),
                );
                if let Some(packet_id) = packet_id {
                    packet.set_packet_id(packet_id)?;
                }
                packet.set_properties(message.properties.clone());
                Packet::V5(v5::Packet::Publish(packet))
            }
            _ => {
                let mut packet = v3::PublishPacket::with_topic(
                    message.topic.clone(),
                    options,
                    message.payload.clone(),
                );
                if let Some(packet_id) = packet_id {
                    packet.set_packet_id(packet_id)?;
                }
                Packet::V3(v3::Packet::Publish(packet))
            }
        };
        self.send(packet)
    }

    /// Send a PUBREL for `packet_id` with the broker's fixed pubrel
    /// properties.
    ///
    /// # Errors
    ///
    /// Returns error if the pipe is gone.
    pub fn send_release(&self, packet_id: PacketId, properties: Properties) -> Result<(), Error> {
        let packet = match self.protocol {
            Some(ProtocolLevel::V5) => Packet::V5(v5::Packet::PublishRelease(
                v5::PublishReleasePacket::with_reason(
                    packet_id,
                    v5::ReasonCode::Success,
                    properties,
                ),
            )),
            _ => Packet::V3(v3::Packet::PublishRelease(v3::PublishReleasePacket::new(
                packet_id,
            ))),
        };
        self.send(packet)
    }
}
