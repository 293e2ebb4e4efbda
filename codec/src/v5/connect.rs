// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use bytes::Bytes;

use super::{Properties, PropertyType};
use crate::utils::check_client_id;
use crate::{Error, Will};

/// Available properties for CONNECT packets.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Available properties for the will attached to CONNECT packets.
pub const WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// The CONNECT packet is the first packet sent by a client after the network
/// connection is established.
///
/// If the clean-start flag is set, the client and server must discard any
/// existing session and start a new one. If the client supplies a zero-byte
/// client id with clean-start unset, the server has no way to map a later
/// connection to this session and rejects the packet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectPacket {
    client_id: String,

    username: Option<String>,

    password: Option<Bytes>,

    will: Option<Will>,

    /// Whether prior session state for this client id is discarded.
    clean_start: bool,

    /// Maximum interval in seconds between client control packets. Zero
    /// turns the keep alive mechanism off.
    keep_alive: u16,

    properties: Properties,
}

impl ConnectPacket {
    /// Create a new CONNECT packet with the given client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains invalid characters.
    pub fn new(client_id: &str) -> Result<Self, Error> {
        check_client_id(client_id)?;
        Ok(Self {
            client_id: client_id.to_string(),
            clean_start: true,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_username(&mut self, username: Option<&str>) -> &mut Self {
        self.username = username.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_password(&mut self, password: Option<Bytes>) -> &mut Self {
        self.password = password;
        self
    }

    #[must_use]
    pub const fn password(&self) -> Option<&Bytes> {
        self.password.as_ref()
    }

    pub fn set_will(&mut self, will: Option<Will>) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    pub fn take_will(&mut self) -> Option<Will> {
        self.will.take()
    }

    pub fn set_clean_start(&mut self, clean_start: bool) -> &mut Self {
        self.clean_start = clean_start;
        self
    }

    #[must_use]
    pub const fn clean_start(&self) -> bool {
        self.clean_start
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}
