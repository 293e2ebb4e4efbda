// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use bytes::Bytes;

use super::{Properties, PropertyType};
use crate::{Error, PacketId, PublishOptions, QoS, TopicName};

/// Available properties for PUBLISH packets.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// The PUBLISH packet transports an application message in either direction.
///
/// The packet identifier field is only present when the QoS level is 1 or 2.
/// The dup flag of an incoming PUBLISH is not propagated when the packet is
/// forwarded to subscribers; its value in an outgoing packet is determined
/// solely by whether that packet is a retransmission [MQTT-3.3.1-3].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    options: PublishOptions,

    /// Absent only when the packet relies on an established topic alias;
    /// it is a protocol error if the topic name is zero length and there
    /// is no topic alias.
    topic: Option<TopicName>,

    packet_id: Option<PacketId>,

    properties: Properties,

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
            topic: Some(topic),
            packet_id: None,
            properties: Properties::new(),
            payload,
        })
    }

    #[must_use]
    pub fn with_topic(topic: TopicName, options: PublishOptions, payload: Bytes) -> Self {
        Self {
            options,
            topic: Some(topic),
            packet_id: None,
            properties: Properties::new(),
            payload,
        }
    }

    /// Create a PUBLISH packet carrying only a previously registered topic
    /// alias instead of a topic name.
    #[must_use]
    pub fn with_alias(alias: u16, qos: QoS, payload: Bytes) -> Self {
        let mut properties = Properties::new();
        properties.push(super::Property::TopicAlias(alias));
        Self {
            options: PublishOptions::new(qos, false),
            topic: None,
            packet_id: None,
            properties,
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
    pub const fn topic(&self) -> Option<&TopicName> {
        self.topic.as_ref()
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
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn set_properties(&mut self, properties: Properties) -> &mut Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }
}
