// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use bytes::Bytes;

use crate::{Error, PacketId, PublishOptions, QoS, TopicName};

/// The PUBLISH packet transports an application message in either direction.
///
/// The packet identifier field is only present when the QoS level is 1 or 2.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    options: PublishOptions,

    topic: TopicName,

    packet_id: Option<PacketId>,

    payload: Bytes,
}

impl PublishPacket {
    /// Create a new PUBLISH packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid topic name.
    pub fn new(topic: &str, qos: QoS, payload: Bytes) -> Result<Self, Error> {
        let topic = TopicName::new(topic)?;
        Ok(Self {
            options: PublishOptions::new(qos, false),
            topic,
            packet_id: None,
            payload,
        })
    }

    #[must_use]
    pub fn with_topic(topic: TopicName, options: PublishOptions, payload: Bytes) -> Self {
        Self {
            options,
            topic,
            packet_id: None,
            payload,
        }
    }

    #[must_use]
    pub const fn options(&self) -> PublishOptions {
        self.options
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.options.qos()
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.options.retain()
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.options.set_retain(retain);
        self
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.options.dup()
    }

    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        self.options.set_dup(dup);
        self
    }

    #[must_use]
    pub const fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Set the packet id of this QoS > 0 exchange.
    ///
    /// # Errors
    ///
    /// Returns error if `packet_id` is zero.
    pub fn set_packet_id(&mut self, packet_id: PacketId) -> Result<&mut Self, Error> {
        if packet_id == 0 {
            return Err(Error::InvalidPacketId);
        }
        self.packet_id = Some(packet_id);
        Ok(self)
    }

    #[must_use]
    pub const fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }
}
