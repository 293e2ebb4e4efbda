// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{Error, PacketId, QoS, TopicFilter};

/// Topic filter/QoS pair in a SUBSCRIBE payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeTopic {
    filter: TopicFilter,

    /// Maximum QoS at which the server can send application messages to
    /// the client for this filter.
    qos: QoS,
}

impl SubscribeTopic {
    /// Create a new subscribe topic.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, qos: QoS) -> Result<Self, Error> {
        let filter = TopicFilter::new(filter)?;
        Ok(Self { filter, qos })
    }

    #[must_use]
    pub const fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
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
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: PacketId, topics: Vec<SubscribeTopic>) -> Self {
        Self { packet_id, topics }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }
}
