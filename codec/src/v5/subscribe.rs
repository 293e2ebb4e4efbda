// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use super::{Properties, PropertyType};
use crate::{Error, PacketId, QoS, TopicFilter};

/// Available properties for SUBSCRIBE packets.
pub const SUBSCRIBE_PROPERTIES: &[PropertyType] = &[
    PropertyType::SubscriptionIdentifier,
    PropertyType::UserProperty,
];

/// Retain Handling subscription option, bits 4 and 5 of the subscription
/// options byte.
///
/// Controls whether retained messages are sent when the subscription is
/// established; it does not affect sending of retained messages at any
/// point after the subscribe.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    Send = 0,

    /// Send retained messages at subscribe only if the subscription does
    /// not currently exist.
    SendOnlyNew = 1,

    /// Do not send retained messages at the time of the subscribe.
    NotSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Send),
            1 => Ok(Self::SendOnlyNew),
            2 => Ok(Self::NotSend),
            _ => Err(Error::InvalidRetainHandling),
        }
    }
}

/// Per-filter subscription options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Maximum QoS at which the server can send application messages to
    /// the client.
    qos: QoS,

    /// No Local option, bit 2. If set, application messages must not be
    /// forwarded to a connection with a client id equal to the client id
    /// of the publishing connection [MQTT-3.8.3-3].
    no_local: bool,

    /// Retain As Published option, bit 3. If set, messages forwarded using
    /// this subscription keep the RETAIN flag they were published with;
    /// otherwise the flag is cleared.
    retain_as_published: bool,

    retain_handling: RetainHandling,
}

impl SubscribeOptions {
    #[must_use]
    pub const fn new(qos: QoS) -> Self {
        Self {
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::Send,
        }
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn set_no_local(&mut self, no_local: bool) -> &mut Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    pub fn set_retain_as_published(&mut self, retain_as_published: bool) -> &mut Self {
        self.retain_as_published = retain_as_published;
        self
    }

    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    pub fn set_retain_handling(&mut self, retain_handling: RetainHandling) -> &mut Self {
        self.retain_handling = retain_handling;
        self
    }
}

/// Topic filter/options pair in a SUBSCRIBE payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeTopic {
    filter: TopicFilter,
    options: SubscribeOptions,
}

impl SubscribeTopic {
    /// Create a new subscribe topic.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, qos: QoS) -> Result<Self, Error> {
        let filter = TopicFilter::new(filter)?;
        Ok(Self {
            filter,
            options: SubscribeOptions::new(qos),
        })
    }

    #[must_use]
    pub fn with_options(filter: TopicFilter, options: SubscribeOptions) -> Self {
        Self { filter, options }
    }

    #[must_use]
    pub const fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    #[must_use]
    pub const fn options(&self) -> SubscribeOptions {
        self.options
    }

    pub fn options_mut(&mut self) -> &mut SubscribeOptions {
        &mut self.options
    }
}

/// The SUBSCRIBE packet is sent from the client to create one or more
/// subscriptions.
///
/// A SUBSCRIBE packet with multiple topic filters must be handled as if a
/// sequence of multiple SUBSCRIBE packets had been received, except that the
/// responses are combined into a single SUBACK [MQTT-3.8.4-4].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscribePacket {
    packet_id: PacketId,
    properties: Properties,
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: PacketId, topics: Vec<SubscribeTopic>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            topics,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}
