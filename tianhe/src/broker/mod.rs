// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The broker dispatch and session engine.
//!
//! One `Broker` owns every piece of broker state and runs on a single task;
//! handlers run to completion between awaits, so no locking is needed on
//! any broker data structure. Transports feed decoded packets in through an
//! mpsc channel and receive outbound packets through per-endpoint pipes.

use std::collections::HashMap;
use tokio::sync::mpsc::Receiver;
use tokio::time::Instant;

use codec::v5::Properties;
use codec::{Packet, PacketType, ProtocolLevel};

use crate::commands::EndpointToBrokerCmd;
use crate::config::BrokerConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, ErrorKind};
use crate::session::SessionStore;
use crate::timer::{TimerQueue, TimerTarget};
use crate::trie::{RetainedTopicMap, SubscriptionMap};
use crate::types::EndpointId;

mod acks;
mod connect;
mod lifecycle;
mod publish;
mod subscribe;

/// Application callback inspecting the property list of one packet kind.
pub type PropsHook = Box<dyn Fn(&Properties) + Send>;

/// The broker engine.
///
/// Construct one per event loop, register property lists and hooks, then
/// drive it with [`Broker::run_loop`].
pub struct Broker {
    config: BrokerConfig,

    receiver: Receiver<EndpointToBrokerCmd>,

    endpoints: HashMap<EndpointId, Endpoint>,

    sessions: SessionStore,

    subs_map: SubscriptionMap,

    retains: RetainedTopicMap,

    timers: TimerQueue,

    // Fixed property lists attached to outbound acks.
    connack_props: Properties,
    suback_props: Properties,
    unsuback_props: Properties,
    puback_props: Properties,
    pubrec_props: Properties,
    pubrel_props: Properties,
    pubcomp_props: Properties,

    on_connect_props: Option<PropsHook>,
    on_disconnect_props: Option<PropsHook>,
    on_publish_props: Option<PropsHook>,
    on_puback_props: Option<PropsHook>,
    on_pubrec_props: Option<PropsHook>,
    on_pubrel_props: Option<PropsHook>,
    on_pubcomp_props: Option<PropsHook>,
    on_subscribe_props: Option<PropsHook>,
    on_unsubscribe_props: Option<PropsHook>,
    on_auth_props: Option<PropsHook>,
}

impl Broker {
    #[must_use]
    pub fn new(config: BrokerConfig, receiver: Receiver<EndpointToBrokerCmd>) -> Self {
        Self {
            config,
            receiver,
            endpoints: HashMap::new(),
            sessions: SessionStore::new(),
            subs_map: SubscriptionMap::new(),
            retains: RetainedTopicMap::new(),
            timers: TimerQueue::new(),
            connack_props: Properties::new(),
            suback_props: Properties::new(),
            unsuback_props: Properties::new(),
            puback_props: Properties::new(),
            pubrec_props: Properties::new(),
            pubrel_props: Properties::new(),
            pubcomp_props: Properties::new(),
            on_connect_props: None,
            on_disconnect_props: None,
            on_publish_props: None,
            on_puback_props: None,
            on_pubrec_props: None,
            on_pubrel_props: None,
            on_pubcomp_props: None,
            on_subscribe_props: None,
            on_unsubscribe_props: None,
            on_auth_props: None,
        }
    }

    pub fn set_connack_props(&mut self, props: Properties) {
        self.connack_props = props;
    }

    pub fn set_suback_props(&mut self, props: Properties) {
        self.suback_props = props;
    }

    pub fn set_unsuback_props(&mut self, props: Properties) {
        self.unsuback_props = props;
    }

    pub fn set_puback_props(&mut self, props: Properties) {
        self.puback_props = props;
    }

    pub fn set_pubrec_props(&mut self, props: Properties) {
        self.pubrec_props = props;
    }

    pub fn set_pubrel_props(&mut self, props: Properties) {
        self.pubrel_props = props;
    }

    pub fn set_pubcomp_props(&mut self, props: Properties) {
        self.pubcomp_props = props;
    }

    pub fn set_connect_props_hook(&mut self, hook: PropsHook) {
        self.on_connect_props = Some(hook);
    }

    pub fn set_disconnect_props_hook(&mut self, hook: PropsHook) {
        self.on_disconnect_props = Some(hook);
    }

    pub fn set_publish_props_hook(&mut self, hook: PropsHook) {
        self.on_publish_props = Some(hook);
    }

    pub fn set_puback_props_hook(&mut self, hook: PropsHook) {
        self.on_puback_props = Some(hook);
    }

    pub fn set_pubrec_props_hook(&mut self, hook: PropsHook) {
        self.on_pubrec_props = Some(hook);
    }

    pub fn set_pubrel_props_hook(&mut self, hook: PropsHook) {
        self.on_pubrel_props = Some(hook);
    }

    pub fn set_pubcomp_props_hook(&mut self, hook: PropsHook) {
        self.on_pubcomp_props = Some(hook);
    }

    pub fn set_subscribe_props_hook(&mut self, hook: PropsHook) {
        self.on_subscribe_props = Some(hook);
    }

    pub fn set_unsubscribe_props_hook(&mut self, hook: PropsHook) {
        self.on_unsubscribe_props = Some(hook);
    }

    pub fn set_auth_props_hook(&mut self, hook: PropsHook) {
        self.on_auth_props = Some(hook);
    }

    /// Delay between receiving DISCONNECT and closing the connection. For
    /// test orchestration.
    pub fn set_disconnect_delay(&mut self, millis: u64) {
        self.config.set_disconnect_delay(millis);
    }

    /// Whether PINGREQ is answered. For keep-alive tests.
    pub fn set_pingresp(&mut self, pingresp: bool) {
        self.config.set_pingresp(pingresp);
    }

    /// Drop every session. For tests and administration.
    pub fn clear_all_sessions(&mut self) {
        self.sessions.clear(&mut self.subs_map);
    }

    /// Drop every retained message. For tests and administration.
    pub fn clear_all_retained_topics(&mut self) {
        self.retains.clear();
    }

    /// Run until every command sender is dropped.
    ///
    /// Commands are handled in receive order; between commands the earliest
    /// pending timer deadline is awaited.
    pub async fn run_loop(&mut self) {
        loop {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_endpoint_cmd(cmd),
                        None => break,
                    }
                }
                () = Self::wait_deadline(deadline) => {
                    self.fire_due_timers();
                }
            }
        }
    }

    async fn wait_deadline(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    fn handle_endpoint_cmd(&mut self, cmd: EndpointToBrokerCmd) {
        match cmd {
            EndpointToBrokerCmd::Accept(endpoint_id, sender) => {
                self.handle_accept(endpoint_id, sender);
            }
            EndpointToBrokerCmd::Packet(endpoint_id, packet) => {
                if let Err(err) = self.handle_packet(endpoint_id, packet) {
                    if err.kind() == ErrorKind::ProtocolError {
                        log::warn!("broker: Protocol violation on {endpoint_id}: {err}");
                        self.protocol_error_close(endpoint_id);
                    } else {
                        log::error!("broker: Failed to handle packet on {endpoint_id}: {err}");
                    }
                }
            }
            EndpointToBrokerCmd::Close(endpoint_id) => {
                self.handle_transport_close(endpoint_id);
            }
            EndpointToBrokerCmd::SetAutoResponse(endpoint_id, auto_response) => {
                if let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) {
                    endpoint.set_auto_response(auto_response);
                }
            }
        }
    }

    /// Register an accepted transport connection.
    ///
    /// The connect timeout starts here; an endpoint that never completes
    /// CONNECT is dropped when it fires.
    fn handle_accept(
        &mut self,
        endpoint_id: EndpointId,
        sender: tokio::sync::mpsc::UnboundedSender<Packet>,
    ) {
        log::info!("broker: Accept endpoint {endpoint_id}");
        self.endpoints
            .insert(endpoint_id, Endpoint::new(endpoint_id, sender));
        if let Some(timeout) = self.config.connect_timeout() {
            self.timers.schedule(
                Instant::now() + timeout,
                TimerTarget::ConnectTimeout { endpoint_id },
            );
        }
    }

    fn handle_packet(&mut self, endpoint_id: EndpointId, packet: Packet) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;

        // The first packet on a connection must be CONNECT, and CONNECT
        // must not be repeated.
        if !endpoint.connected() && packet.packet_type() != PacketType::Connect {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!(
                    "broker: {:?} before CONNECT on {endpoint_id}",
                    packet.packet_type()
                ),
            ));
        }
        if endpoint.connected() && packet.packet_type() == PacketType::Connect {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("broker: Duplicate CONNECT on {endpoint_id}"),
            ));
        }
        if let Some(protocol) = endpoint.protocol() {
            if protocol != packet.protocol_level() {
                return Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!("broker: Protocol version changed mid-stream on {endpoint_id}"),
                ));
            }
        }

        match packet {
            Packet::V3(packet) => self.handle_v3_packet(endpoint_id, packet),
            Packet::V5(packet) => self.handle_v5_packet(endpoint_id, packet),
        }
    }

    fn handle_v3_packet(
        &mut self,
        endpoint_id: EndpointId,
        packet: codec::v3::Packet,
    ) -> Result<(), Error> {
        use codec::v3::Packet as V3;
        match packet {
            V3::Connect(packet) => {
                self.connect_handler(endpoint_id, connect::ConnectRequest::from_v3(packet))
            }
            V3::Publish(packet) => {
                let topic = packet.topic().clone();
                self.publish_handler(
                    endpoint_id,
                    packet.packet_id(),
                    packet.options(),
                    Some(topic),
                    packet.payload().clone(),
                    Properties::new(),
                )
            }
            V3::PublishAck(packet) => self.puback_handler(endpoint_id, packet.packet_id()),
            V3::PublishReceived(packet) => self.pubrec_handler(endpoint_id, packet.packet_id()),
            V3::PublishRelease(packet) => self.pubrel_handler(endpoint_id, packet.packet_id()),
            V3::PublishComplete(packet) => self.pubcomp_handler(endpoint_id, packet.packet_id()),
            V3::Subscribe(packet) => {
                let entries = packet
                    .topics()
                    .iter()
                    .map(|topic| {
                        (
                            topic.filter().clone(),
                            codec::v5::SubscribeOptions::new(topic.qos()),
                        )
                    })
                    .collect();
                self.subscribe_handler(endpoint_id, packet.packet_id(), entries, None)
            }
            V3::Unsubscribe(packet) => {
                self.unsubscribe_handler(endpoint_id, packet.packet_id(), packet.topics().to_vec())
            }
            V3::PingRequest(_) => self.pingreq_handler(endpoint_id),
            V3::Disconnect(_) => self.disconnect_handler(endpoint_id, None),
            V3::ConnectAck(_) | V3::SubscribeAck(_) | V3::UnsubscribeAck(_) | V3::PingResponse(_) => {
                Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!(
                        "broker: Server-side packet {:?} from client on {endpoint_id}",
                        packet.packet_type()
                    ),
                ))
            }
        }
    }

    fn handle_v5_packet(
        &mut self,
        endpoint_id: EndpointId,
        packet: codec::v5::Packet,
    ) -> Result<(), Error> {
        use codec::v5::Packet as V5;
        match packet {
            V5::Connect(packet) => {
                if let Some(hook) = &self.on_connect_props {
                    hook(packet.properties());
                }
                self.connect_handler(endpoint_id, connect::ConnectRequest::from_v5(packet))
            }
            V5::Publish(packet) => {
                if let Some(hook) = &self.on_publish_props {
                    hook(packet.properties());
                }
                self.publish_handler(
                    endpoint_id,
                    packet.packet_id(),
                    packet.options(),
                    packet.topic().cloned(),
                    packet.payload().clone(),
                    packet.properties().clone(),
                )
            }
            V5::PublishAck(packet) => {
                if let Some(hook) = &self.on_puback_props {
                    hook(packet.properties());
                }
                self.puback_handler(endpoint_id, packet.packet_id())
            }
            V5::PublishReceived(packet) => {
                if let Some(hook) = &self.on_pubrec_props {
                    hook(packet.properties());
                }
                self.pubrec_handler(endpoint_id, packet.packet_id())
            }
            V5::PublishRelease(packet) => {
                if let Some(hook) = &self.on_pubrel_props {
                    hook(packet.properties());
                }
                self.pubrel_handler(endpoint_id, packet.packet_id())
            }
            V5::PublishComplete(packet) => {
                if let Some(hook) = &self.on_pubcomp_props {
                    hook(packet.properties());
                }
                self.pubcomp_handler(endpoint_id, packet.packet_id())
            }
            V5::Subscribe(packet) => {
                if let Some(hook) = &self.on_subscribe_props {
                    hook(packet.properties());
                }
                let sid = packet
                    .properties()
                    .subscription_identifier()
                    .filter(|sid| *sid != 0);
                let entries = packet
                    .topics()
                    .iter()
                    .map(|topic| (topic.filter().clone(), topic.options()))
                    .collect();
                self.subscribe_handler(endpoint_id, packet.packet_id(), entries, sid)
            }
            V5::Unsubscribe(packet) => {
                if let Some(hook) = &self.on_unsubscribe_props {
                    hook(packet.properties());
                }
                self.unsubscribe_handler(endpoint_id, packet.packet_id(), packet.topics().to_vec())
            }
            V5::PingRequest(_) => self.pingreq_handler(endpoint_id),
            V5::Disconnect(packet) => {
                if let Some(hook) = &self.on_disconnect_props {
                    hook(packet.properties());
                }
                self.disconnect_handler(endpoint_id, Some(packet.properties().clone()))
            }
            V5::Auth(packet) => {
                if let Some(hook) = &self.on_auth_props {
                    hook(packet.properties());
                }
                Ok(())
            }
            V5::ConnectAck(_) | V5::SubscribeAck(_) | V5::UnsubscribeAck(_) | V5::PingResponse(_) => {
                Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!(
                        "broker: Server-side packet {:?} from client on {endpoint_id}",
                        packet.packet_type()
                    ),
                ))
            }
        }
    }

    fn pingreq_handler(&mut self, endpoint_id: EndpointId) -> Result<(), Error> {
        if !self.config.pingresp() {
            return Ok(());
        }
        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        let packet = match endpoint.protocol() {
            Some(ProtocolLevel::V5) => Packet::V5(codec::v5::Packet::PingResponse(
                codec::v5::PingResponsePacket::new(),
            )),
            _ => Packet::V3(codec::v3::Packet::PingResponse(
                codec::v3::PingResponsePacket::new(),
            )),
        };
        endpoint.send(packet)
    }
}
