// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use bytes::Bytes;

use crate::v5::Properties;
use crate::{QoS, TopicName};

/// Last Will and Testament attached to a CONNECT packet.
///
/// The broker publishes the will message on behalf of a client whose
/// connection closes without a DISCONNECT packet. For MQTT 3.1.1 connections
/// the property list is empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Will {
    topic: TopicName,
    message: Bytes,
    qos: QoS,
    retain: bool,
    properties: Properties,
}

impl Will {
    #[must_use]
    pub fn new(topic: TopicName, message: Bytes, qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            message,
            qos,
            retain,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub const fn topic(&self) -> &TopicName {
        &self.topic
    }

    #[must_use]
    pub const fn message(&self) -> &Bytes {
        &self.message
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
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

    /// Take the property list out, leaving an empty one.
    pub fn take_properties(&mut self) -> Properties {
        std::mem::take(&mut self.properties)
    }

    pub fn into_parts(self) -> (TopicName, Bytes, QoS, bool, Properties) {
        (
            self.topic,
            self.message,
            self.qos,
            self.retain,
            self.properties,
        )
    }
}
