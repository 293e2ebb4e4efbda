// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! CONNECT handling and session resumption.

use std::time::Duration;
use tokio::time::Instant;

use codec::v5::Properties;
use codec::{v3, v5, Packet, ProtocolLevel, Will};

use super::Broker;
use crate::error::Error;
use crate::session::{SessionState, SessionWill};
use crate::timer::TimerTarget;
use crate::types::EndpointId;

/// A CONNECT packet of either version, normalized for the handler.
#[derive(Debug)]
pub(super) struct ConnectRequest {
    pub protocol: ProtocolLevel,
    pub client_id: String,
    pub will: Option<Will>,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub properties: Properties,
}

impl ConnectRequest {
    pub(super) fn from_v3(mut packet: v3::ConnectPacket) -> Self {
        Self {
            protocol: ProtocolLevel::V311,
            client_id: packet.client_id().to_string(),
            will: packet.take_will(),
            clean_start: packet.clean_session(),
            keep_alive: packet.keep_alive(),
            properties: Properties::new(),
        }
    }

    pub(super) fn from_v5(mut packet: v5::ConnectPacket) -> Self {
        Self {
            protocol: ProtocolLevel::V5,
            client_id: packet.client_id().to_string(),
            will: packet.take_will(),
            clean_start: packet.clean_start(),
            keep_alive: packet.keep_alive(),
            properties: packet.properties().clone(),
        }
    }
}

impl Broker {
    /// Process an incoming CONNECT packet.
    ///
    /// Decides between creating a fresh session, taking over an online one,
    /// and resuming an offline one, and reports the outcome in the CONNACK
    /// session-present flag.
    pub(super) fn connect_handler(
        &mut self,
        endpoint_id: EndpointId,
        request: ConnectRequest,
    ) -> Result<(), Error> {
        let mut session_expiry_interval = None;
        let mut will_expiry_interval = None;
        let mut will_delay = None;

        if request.protocol == ProtocolLevel::V5 {
            // A session expiry of 0 means the session ends on disconnect,
            // the same as an absent property.
            session_expiry_interval = request
                .properties
                .session_expiry_interval()
                .filter(|value| *value != 0)
                .map(|value| Duration::from_secs(value.into()));

            if let Some(will) = &request.will {
                will_expiry_interval = will
                    .properties()
                    .message_expiry_interval()
                    .map(|value| Duration::from_secs(value.into()));
                will_delay = will
                    .properties()
                    .will_delay_interval()
                    .filter(|value| *value != 0)
                    .map(|value| Duration::from_secs(value.into()));
            }
        }

        // A zero-byte client id without clean-start leaves no way to map a
        // later connection to this session, so the connection is rejected.
        if request.client_id.is_empty() && !request.clean_start {
            log::info!("broker: Reject empty client id with clean-start=false on {endpoint_id}");
            let endpoint = self
                .endpoints
                .remove(&endpoint_id)
                .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
            let connack = match request.protocol {
                ProtocolLevel::V5 => Packet::V5(v5::Packet::ConnectAck(v5::ConnectAckPacket::new(
                    false,
                    v5::ReasonCode::ClientIdentifierNotValid,
                ))),
                _ => Packet::V3(v3::Packet::ConnectAck(v3::ConnectAckPacket::new(
                    false,
                    v3::ConnectReturnCode::IdentifierRejected,
                ))),
            };
            // The endpoint is already deregistered; a send failure only
            // means the transport beat us to closing.
            if let Err(err) = endpoint.send(connack) {
                log::info!("broker: Endpoint {endpoint_id} closed before reject connack: {err}");
            }
            return Ok(());
        }

        let endpoint = self
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        endpoint.set_connect_info(
            request.protocol,
            &request.client_id,
            request.clean_start,
            request.keep_alive,
        );

        // Decide on the prior state without holding a borrow into the
        // session store; the online branch mutates it through close_proc.
        enum Prior {
            None,
            Online(EndpointId),
            Offline,
        }
        let prior = match self.sessions.find_by_client_id(&request.client_id) {
            None => Prior::None,
            Some(session) => match session.endpoint_id() {
                Some(prior_endpoint) => Prior::Online(prior_endpoint),
                None => Prior::Offline,
            },
        };

        match prior {
            Prior::None => {
                self.create_session(
                    endpoint_id,
                    &request.client_id,
                    request.will,
                    will_expiry_interval,
                    will_delay,
                    session_expiry_interval,
                )?;
                self.send_connack(endpoint_id, false)
            }
            Prior::Online(prior_endpoint) => {
                // Take over: close the prior connection first, sending its
                // will; whether a session remains decides between inherit
                // and fresh state.
                log::info!(
                    "broker: Client {} takes over session from endpoint {prior_endpoint}",
                    request.client_id
                );
                let remains = self.close_proc(prior_endpoint, true);
                if remains {
                    self.resume_session(
                        endpoint_id,
                        &request.client_id,
                        request.clean_start,
                        request.will,
                        will_expiry_interval,
                        will_delay,
                        session_expiry_interval,
                    )
                } else {
                    self.create_session(
                        endpoint_id,
                        &request.client_id,
                        request.will,
                        will_expiry_interval,
                        will_delay,
                        session_expiry_interval,
                    )?;
                    self.send_connack(endpoint_id, false)
                }
            }
            Prior::Offline => self.resume_session(
                endpoint_id,
                &request.client_id,
                request.clean_start,
                request.will,
                will_expiry_interval,
                will_delay,
                session_expiry_interval,
            ),
        }
    }

    fn create_session(
        &mut self,
        endpoint_id: EndpointId,
        client_id: &str,
        will: Option<Will>,
        will_expiry_interval: Option<Duration>,
        will_delay: Option<Duration>,
        session_expiry_interval: Option<Duration>,
    ) -> Result<(), Error> {
        let mut session = SessionState::new(client_id, endpoint_id);
        session.set_session_expiry_interval(session_expiry_interval);
        self.sessions.insert(session);
        self.install_will(client_id, will, will_expiry_interval, will_delay);
        Ok(())
    }

    /// Make an existing offline session the state of this connection,
    /// either discarding it (clean start) or inheriting it.
    #[allow(clippy::too_many_arguments)]
    fn resume_session(
        &mut self,
        endpoint_id: EndpointId,
        client_id: &str,
        clean_start: bool,
        will: Option<Will>,
        will_expiry_interval: Option<Duration>,
        will_delay: Option<Duration>,
        session_expiry_interval: Option<Duration>,
    ) -> Result<(), Error> {
        if clean_start {
            self.send_connack(endpoint_id, false)?;
            if let Some(session) = self.sessions.find_by_client_id_mut(client_id) {
                session.clean(&mut self.subs_map);
                session.set_session_expiry_interval(session_expiry_interval);
            }
            self.sessions.bind_endpoint(client_id, endpoint_id);
            self.install_will(client_id, will, will_expiry_interval, will_delay);
            Ok(())
        } else {
            self.send_connack(endpoint_id, true)?;
            let mut alias_table = None;
            if let Some(session) = self.sessions.find_by_client_id_mut(client_id) {
                // Cancel the session expiry timer; the session is online
                // again.
                session.bump_expiry_generation();
                session.set_session_expiry_interval(session_expiry_interval);
                alias_table = session.take_topic_alias_recv();
            }
            self.sessions.bind_endpoint(client_id, endpoint_id);
            self.install_will(client_id, will, will_expiry_interval, will_delay);
            if let Some(table) = alias_table {
                if let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) {
                    endpoint.restore_topic_alias_recv(table);
                }
            }
            self.send_inflight_messages(endpoint_id, client_id);
            self.send_offline_messages(endpoint_id, client_id);
            Ok(())
        }
    }

    /// Attach the connection's will to the session, arming the will expiry
    /// timer when the will carries a message expiry interval. Replacing the
    /// will invalidates timers armed for a previous one, which also cancels
    /// a pending delayed will on reconnect.
    pub(super) fn install_will(
        &mut self,
        client_id: &str,
        will: Option<Will>,
        will_expiry_interval: Option<Duration>,
        will_delay: Option<Duration>,
    ) {
        let now = Instant::now();
        let expiry_at = will_expiry_interval.map(|interval| now + interval);
        let Some(session) = self.sessions.find_by_client_id_mut(client_id) else {
            return;
        };
        let has_will = will.is_some();
        let generation = session.update_will(will.map(|will| SessionWill {
            will,
            expiry_at,
            delay: will_delay,
            delay_pending: false,
        }));
        if has_will {
            if let Some(expiry_at) = expiry_at {
                self.timers.schedule(
                    expiry_at,
                    TimerTarget::WillExpiry {
                        client_id: client_id.to_string(),
                        generation,
                    },
                );
            }
        }
    }

    fn send_connack(&mut self, endpoint_id: EndpointId, session_present: bool) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        let packet = match endpoint.protocol() {
            Some(ProtocolLevel::V5) => {
                let mut connack =
                    v5::ConnectAckPacket::new(session_present, v5::ReasonCode::Success);
                connack.set_properties(self.connack_props.clone());
                Packet::V5(v5::Packet::ConnectAck(connack))
            }
            _ => Packet::V3(v3::Packet::ConnectAck(v3::ConnectAckPacket::new(
                session_present,
                v3::ConnectReturnCode::Accepted,
            ))),
        };
        endpoint.send(packet)
    }

    /// Re-send QoS 1/2 messages stored by a previous connection, in store
    /// order, with the remaining message expiry and the dup flag set.
    pub(super) fn send_inflight_messages(&mut self, endpoint_id: EndpointId, client_id: &str) {
        let now = Instant::now();
        let Some(session) = self.sessions.find_by_client_id_mut(client_id) else {
            return;
        };
        let inflight = session.take_inflight_messages();
        let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) else {
            return;
        };
        for entry in inflight {
            let mut stored = entry.message;
            if let Some(expiry_at) = entry.expiry_at {
                if let crate::endpoint::StoredMessage::Publish { message, .. } = &mut stored {
                    let remaining = expiry_at.saturating_duration_since(now).as_secs();
                    message
                        .properties
                        .update_message_expiry_interval(u32::try_from(remaining).unwrap_or(u32::MAX));
                }
            }
            if let Err(err) = endpoint.send_store_message(stored) {
                log::error!("broker: Failed to resend inflight message to {client_id}: {err}");
                return;
            }
        }
    }

    /// Deliver the offline queue in FIFO order with the remaining message
    /// expiry. A message that cannot get a packet id is dropped, the session
    /// is kept.
    pub(super) fn send_offline_messages(&mut self, endpoint_id: EndpointId, client_id: &str) {
        let now = Instant::now();
        let Some(session) = self.sessions.find_by_client_id_mut(client_id) else {
            return;
        };
        let queued = session.take_offline_messages();
        let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) else {
            return;
        };
        for entry in queued {
            let mut message = entry.message;
            if let Some(expiry_at) = entry.expiry_at {
                let remaining = expiry_at.saturating_duration_since(now).as_secs();
                message
                    .properties
                    .update_message_expiry_interval(u32::try_from(remaining).unwrap_or(u32::MAX));
            }
            if let Err(err) = endpoint.publish_message(&message) {
                match err.kind() {
                    crate::error::ErrorKind::PacketIdExhausted => {
                        log::warn!("broker: {err}");
                    }
                    _ => {
                        log::error!(
                            "broker: Failed to send offline message to {client_id}: {err}"
                        );
                        return;
                    }
                }
            }
        }
    }

}
