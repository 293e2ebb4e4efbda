// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Connection close, will dispatch and timer firing.

use std::time::Duration;
use tokio::time::Instant;

use codec::v5::{Properties, PropertyType};
use codec::{v5, Packet, ProtocolLevel, PublishOptions};

use super::Broker;
use crate::endpoint::StoredMessage;
use crate::error::{Error, ErrorKind};
use crate::session::InflightMessage;
use crate::timer::TimerTarget;
use crate::types::{EndpointId, SESSION_NEVER_EXPIRE};

impl Broker {
    /// The transport reported an endpoint closed or failed.
    pub(super) fn handle_transport_close(&mut self, endpoint_id: EndpointId) {
        let Some(endpoint) = self.endpoints.get(&endpoint_id) else {
            // Already closed by DISCONNECT handling.
            return;
        };
        // After DISCONNECT the will stays suppressed even when the
        // transport close beats the delayed close timer.
        let send_will = !endpoint.disconnected();
        log::info!("broker: Transport closed endpoint {endpoint_id}, send_will: {send_will}");
        self.close_proc(endpoint_id, send_will);
    }

    /// Answer a protocol violation, then close the connection with the will.
    ///
    /// An established 5.0 connection gets DISCONNECT with a protocol error
    /// reason; 3.1.1 has no server-side DISCONNECT, the connection is just
    /// closed.
    pub(super) fn protocol_error_close(&mut self, endpoint_id: EndpointId) {
        if let Some(endpoint) = self.endpoints.get(&endpoint_id) {
            if endpoint.protocol() == Some(ProtocolLevel::V5) && endpoint.connected() {
                let packet = Packet::V5(v5::Packet::Disconnect(v5::DisconnectPacket::with_reason(
                    v5::ReasonCode::ProtocolError,
                    Properties::new(),
                )));
                if let Err(err) = endpoint.send(packet) {
                    log::info!("broker: Endpoint {endpoint_id} gone before disconnect: {err}");
                }
            }
        }
        self.close_proc(endpoint_id, true);
    }

    /// Graceful DISCONNECT from the client.
    ///
    /// A 5.0 DISCONNECT may update the session expiry interval before the
    /// close. The will is not published. A configured disconnect delay
    /// defers the close through the timer queue.
    pub(super) fn disconnect_handler(
        &mut self,
        endpoint_id: EndpointId,
        properties: Option<Properties>,
    ) -> Result<(), Error> {
        if let Some(properties) = &properties {
            if let Some(interval) = properties.session_expiry_interval() {
                let client_id = self.sessions.client_id_by_endpoint(endpoint_id).cloned();
                if let Some(client_id) = client_id {
                    if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                        // A client that connected with session expiry 0 must
                        // not raise it on DISCONNECT.
                        if session.session_expiry_interval().is_none() && interval > 0 {
                            return Err(Error::from_string(
                                ErrorKind::ProtocolError,
                                format!(
                                    "broker: Session expiry raised from zero on {endpoint_id}"
                                ),
                            ));
                        }
                        let interval = if interval == 0 {
                            None
                        } else {
                            Some(Duration::from_secs(interval.into()))
                        };
                        session.set_session_expiry_interval(interval);
                    }
                }
            }
        }

        let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) else {
            return Err(Error::endpoint_error(endpoint_id));
        };
        endpoint.set_disconnected();

        match self.config.disconnect_delay() {
            Some(delay) => {
                self.timers
                    .schedule(Instant::now() + delay, TimerTarget::CloseDelay { endpoint_id });
            }
            None => {
                self.close_proc(endpoint_id, false);
            }
        }
        Ok(())
    }

    /// Clean up a connection that is going away.
    ///
    /// Publishes or schedules the will as requested, then either erases the
    /// session (clean-session / zero expiry) or transitions it offline,
    /// draining the endpoint's unacknowledged messages into the session and
    /// arming the session expiry timer.
    ///
    /// Returns true when an offline session remains. The CONNECT takeover
    /// path uses the return value to choose between inheriting and starting
    /// fresh.
    pub(super) fn close_proc(&mut self, endpoint_id: EndpointId, send_will: bool) -> bool {
        let Some(client_id) = self.sessions.client_id_by_endpoint(endpoint_id).cloned() else {
            // The client closed before CONNECT completed; nothing to do.
            self.endpoints.remove(&endpoint_id);
            return false;
        };

        let session_clear = match self.endpoints.get(&endpoint_id).and_then(|e| e.protocol()) {
            Some(ProtocolLevel::V5) => self
                .sessions
                .find_by_client_id(&client_id)
                .map_or(true, |session| session.session_expiry_interval().is_none()),
            _ => self
                .endpoints
                .get(&endpoint_id)
                .map_or(true, |endpoint| endpoint.clean_session()),
        };

        self.handle_close_will(&client_id, endpoint_id, send_will, session_clear);

        if session_clear {
            if let Some(mut session) = self.sessions.erase(&client_id) {
                session.unsubscribe_all(&mut self.subs_map);
            }
            self.endpoints.remove(&endpoint_id);
            false
        } else {
            let Some(mut endpoint) = self.endpoints.remove(&endpoint_id) else {
                self.sessions.unbind_endpoint(&client_id);
                return true;
            };
            let stored = endpoint.take_store();
            let alias_table = endpoint.take_topic_alias_recv();
            let now = Instant::now();

            let mut timer_arms = Vec::new();
            if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                for message in stored {
                    let seq = session.next_message_seq();
                    // The deadline restarts from the interval the message
                    // carries at close time.
                    let expiry_at = match &message {
                        StoredMessage::Publish { message, .. } => message
                            .properties
                            .message_expiry_interval()
                            .map(|secs| now + Duration::from_secs(secs.into())),
                        StoredMessage::Release { .. } => None,
                    };
                    session.push_inflight_message(InflightMessage {
                        seq,
                        message,
                        expiry_at,
                    });
                    if let Some(expiry_at) = expiry_at {
                        timer_arms.push((
                            expiry_at,
                            TimerTarget::InflightExpiry {
                                client_id: client_id.clone(),
                                seq,
                            },
                        ));
                    }
                }
                session.set_topic_alias_recv(alias_table);

                if let Some(interval) = session.session_expiry_interval() {
                    if interval != SESSION_NEVER_EXPIRE {
                        let generation = session.bump_expiry_generation();
                        timer_arms.push((
                            now + interval,
                            TimerTarget::SessionExpiry {
                                client_id: client_id.clone(),
                                generation,
                            },
                        ));
                    }
                }
            }
            self.sessions.unbind_endpoint(&client_id);
            for (deadline, target) in timer_arms {
                self.timers.schedule(deadline, target);
            }
            true
        }
    }

    /// Publish, defer or drop the will of a closing connection.
    fn handle_close_will(
        &mut self,
        client_id: &str,
        endpoint_id: EndpointId,
        send_will: bool,
        session_clear: bool,
    ) {
        let Some(session) = self.sessions.find_by_client_id_mut(client_id) else {
            return;
        };
        if session.will().is_none() {
            return;
        }
        if !send_will {
            session.reset_will();
            return;
        }
        let delay = session.will().and_then(|will| will.delay);
        match delay {
            // The will waits out its delay only while the session persists;
            // a session ending now publishes immediately.
            Some(delay) if !session_clear && !delay.is_zero() => {
                if let Some(will) = session.will_mut() {
                    will.delay_pending = true;
                }
                let generation = session.will_generation();
                self.timers.schedule(
                    Instant::now() + delay,
                    TimerTarget::WillDelay {
                        client_id: client_id.to_string(),
                        generation,
                    },
                );
            }
            _ => {
                self.publish_will(client_id, Some(endpoint_id));
            }
        }
    }

    /// Publish the session's will through the normal dispatch path, with
    /// the remaining message expiry, then drop it.
    pub(super) fn publish_will(&mut self, client_id: &str, origin: Option<EndpointId>) {
        let now = Instant::now();
        let Some(session) = self.sessions.find_by_client_id_mut(client_id) else {
            return;
        };
        let Some(will_state) = session.take_will() else {
            return;
        };
        session.reset_will();

        let (topic, payload, qos, retain, mut properties) = will_state.will.into_parts();
        // The delay interval is consumed here; it is not a property of the
        // published message.
        properties.remove(PropertyType::WillDelayInterval);
        if let Some(expiry_at) = will_state.expiry_at {
            let remaining = expiry_at.saturating_duration_since(now).as_secs();
            properties.update_message_expiry_interval(u32::try_from(remaining).unwrap_or(u32::MAX));
        }

        log::info!("broker: Publish will of {client_id} to {topic}");
        self.do_publish(
            origin,
            topic,
            payload,
            PublishOptions::new(qos, retain),
            properties,
        );
    }

    /// Run every timer whose deadline passed.
    pub(super) fn fire_due_timers(&mut self) {
        let now = Instant::now();
        for target in self.timers.pop_due(now) {
            self.fire_timer(target);
        }
    }

    /// Resolve one fired timer against current state; stale generations
    /// and vanished targets are no-ops.
    fn fire_timer(&mut self, target: TimerTarget) {
        match target {
            TimerTarget::SessionExpiry {
                client_id,
                generation,
            } => {
                let valid = self.sessions.find_by_client_id(&client_id).is_some_and(
                    |session| !session.online() && session.expiry_generation() == generation,
                );
                if !valid {
                    return;
                }
                log::info!("broker: Session of {client_id} expired");
                // A will still waiting out its delay is published when the
                // session ends.
                let pending_will = self
                    .sessions
                    .find_by_client_id(&client_id)
                    .and_then(|session| session.will())
                    .is_some_and(|will| will.delay_pending);
                if pending_will {
                    self.publish_will(&client_id, None);
                }
                if let Some(mut session) = self.sessions.erase(&client_id) {
                    session.unsubscribe_all(&mut self.subs_map);
                }
            }
            TimerTarget::WillDelay {
                client_id,
                generation,
            } => {
                // Only a will that is still waiting out this delay is
                // published; a replaced or already published will left a
                // different generation or no pending flag behind.
                let valid = self
                    .sessions
                    .find_by_client_id(&client_id)
                    .is_some_and(|session| {
                        session.will_generation() == generation
                            && session.will().is_some_and(|will| will.delay_pending)
                    });
                if valid {
                    self.publish_will(&client_id, None);
                }
            }
            TimerTarget::WillExpiry {
                client_id,
                generation,
            } => {
                if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                    if session.will_generation() == generation {
                        log::info!("broker: Will of {client_id} expired unsent");
                        session.reset_will();
                    }
                }
            }
            TimerTarget::RetainExpiry { topic, generation } => {
                if self.retains.erase_if_generation(&topic, generation) {
                    log::info!("broker: Retained message on {topic} expired");
                }
            }
            TimerTarget::InflightExpiry { client_id, seq } => {
                if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                    session.remove_inflight_message(seq);
                }
            }
            TimerTarget::OfflineExpiry { client_id, seq } => {
                if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                    session.remove_offline_message(seq);
                }
            }
            TimerTarget::ConnectTimeout { endpoint_id } => {
                let stalled = self
                    .endpoints
                    .get(&endpoint_id)
                    .is_some_and(|endpoint| !endpoint.connected());
                if stalled {
                    log::warn!("broker: Endpoint {endpoint_id} sent no CONNECT in time");
                    self.endpoints.remove(&endpoint_id);
                }
            }
            TimerTarget::CloseDelay { endpoint_id } => {
                if self.endpoints.contains_key(&endpoint_id) {
                    self.close_proc(endpoint_id, false);
                }
            }
        }
    }
}
