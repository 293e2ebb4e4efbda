// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::convert::TryFrom;

use crate::error::Error;

/// Packet identifier.
///
/// Identifies an in-flight QoS > 0 exchange within one session direction.
pub type PacketId = u16;

/// Types of MQTT control packets.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum PacketType {
    /// Request to connect to broker
    #[default]
    Connect = 1,

    /// Broker reply to connect request
    ConnectAck = 2,

    /// Publish message
    Publish = 3,

    /// Publish acknowledgement
    PublishAck = 4,

    /// Publish received
    PublishReceived = 5,

    /// Publish release
    PublishRelease = 6,

    /// Publish complete
    PublishComplete = 7,

    /// Client subscribe request
    Subscribe = 8,

    /// Subscribe acknowledgement
    SubscribeAck = 9,

    /// Unsubscribe request
    Unsubscribe = 10,

    /// Unsubscribe acknowledgement
    UnsubscribeAck = 11,

    /// Client ping request
    PingRequest = 12,

    /// Server ping response
    PingResponse = 13,

    /// Connection is closing
    Disconnect = 14,

    /// Authentication exchange, MQTT 5.0 only
    Auth = 15,
}

/// Protocol version byte in the CONNECT variable header.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ProtocolLevel {
    /// MQTT 3.1
    V31 = 3,

    /// MQTT 3.1.1
    #[default]
    V311 = 4,

    /// MQTT 5.0
    V5 = 5,
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            3 => Ok(Self::V31),
            4 => Ok(Self::V311),
            5 => Ok(Self::V5),
            _ => Err(Error::InvalidProtocolLevel),
        }
    }
}

/// Quality of service level of an application message.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(Error::InvalidQoS),
        }
    }
}

/// Fixed header flags of a PUBLISH packet.
///
/// The dup flag is not propagated by the broker when forwarding; it is
/// determined solely by whether the outgoing packet is a retransmission.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct PublishOptions {
    dup: bool,
    qos: QoS,
    retain: bool,
}

impl PublishOptions {
    #[must_use]
    pub const fn new(qos: QoS, retain: bool) -> Self {
        Self {
            dup: false,
            qos,
            retain,
        }
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        self.dup = dup;
        self
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
    pub const fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    /// Downgrade qos to the maximum granted to a subscription, keeping
    /// the other flags.
    #[must_use]
    pub fn min_qos(&self, qos: QoS) -> Self {
        Self {
            dup: self.dup,
            qos: match self.qos.cmp(&qos) {
                Ordering::Less | Ordering::Equal => self.qos,
                Ordering::Greater => qos,
            },
            retain: self.retain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_order() {
        assert!(QoS::AtMostOnce < QoS::AtLeastOnce);
        assert!(QoS::AtLeastOnce < QoS::ExactOnce);
    }

    #[test]
    fn test_min_qos() {
        let opts = PublishOptions::new(QoS::ExactOnce, true);
        let downgraded = opts.min_qos(QoS::AtLeastOnce);
        assert_eq!(downgraded.qos(), QoS::AtLeastOnce);
        assert!(downgraded.retain());
    }
}
