// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use bytes::Bytes;

use crate::utils::check_client_id;
use crate::{Error, Will};

/// The CONNECT packet is the first packet sent by a client after the network
/// connection is established.
///
/// If the client supplies a zero-byte client id, it must also set
/// clean-session to 1 [MQTT-3.1.3-7]; otherwise there is no way to map a
/// later connection to the session and the server rejects the packet with
/// `IdentifierRejected`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectPacket {
    client_id: String,

    username: Option<String>,

    password: Option<Bytes>,

    will: Option<Will>,

    /// If unset, the server resumes communications with the client based on
    /// the stored session state.
    clean_session: bool,

    keep_alive: u16,
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
            clean_session: true,
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

    /// Attach the will message. The property list of a will on a 3.1.1
    /// connection stays empty.
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

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }
}
