// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::Error;

/// A Reason Code is a one byte unsigned value that indicates the result of
/// an operation.
///
/// Reason Codes less than 0x80 indicate successful completion of an operation.
/// The normal Reason Code for success is 0. Reason Code values of 0x80 or
/// greater indicate failure. Which codes are valid depends on the packet
/// type; the per-packet `*_REASONS` lists record the valid subsets.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ReasonCode {
    /// Success / Normal disconnection / Granted QoS 0.
    #[default]
    Success = 0x00,

    /// Granted QoS 1, SUBACK.
    GrantedQoS1 = 0x01,

    /// Granted QoS 2, SUBACK.
    GrantedQoS2 = 0x02,

    /// The client wishes to disconnect but requires that the server also
    /// publishes its will message.
    DisconnectWithWillMessage = 0x04,

    /// No matching subscribers, PUBACK/PUBREC.
    NoMatchingSubscribers = 0x10,

    /// No subscription existed, UNSUBACK.
    NoSubscriptionExisted = 0x11,

    /// Continue the authentication with another step, AUTH.
    ContinueAuthentication = 0x18,

    /// Initiate a re-authentication, AUTH.
    ReAuthenticate = 0x19,

    /// The server does not wish to reveal the reason for the failure,
    /// or none of the other codes apply.
    UnspecifiedError = 0x80,

    /// Data within the packet could not be correctly parsed.
    MalformedPacket = 0x81,

    /// Data in the packet does not conform to this specification.
    ProtocolError = 0x82,

    /// The packet is valid but is not accepted by this server.
    ImplementationSpecificError = 0x83,

    /// The server does not support the requested protocol version.
    UnsupportedProtocolVersion = 0x84,

    /// The client identifier is a valid string but is not allowed.
    ClientIdentifierNotValid = 0x85,

    BadUserNameOrPassword = 0x86,

    NotAuthorized = 0x87,

    ServerUnavailable = 0x88,

    ServerBusy = 0x89,

    Banned = 0x8a,

    ServerShuttingDown = 0x8b,

    BadAuthenticationMethod = 0x8c,

    KeepAliveTimeout = 0x8d,

    /// Another connection using the same client id has connected, causing
    /// this connection to be closed.
    SessionTakenOver = 0x8e,

    TopicFilterInvalid = 0x8f,

    TopicNameInvalid = 0x90,

    PacketIdentifierInUse = 0x91,

    PacketIdentifierNotFound = 0x92,

    ReceiveMaximumExceeded = 0x93,

    TopicAliasInvalid = 0x94,

    PacketTooLarge = 0x95,

    MessageRateTooHigh = 0x96,

    QuotaExceeded = 0x97,

    AdministrativeAction = 0x98,

    PayloadFormatInvalid = 0x99,

    RetainNotSupported = 0x9a,

    QoSNotSupported = 0x9b,

    UseAnotherServer = 0x9c,

    ServerMoved = 0x9d,

    SharedSubscriptionsNotSupported = 0x9e,

    ConnectionRateExceeded = 0x9f,

    MaximumConnectTime = 0xa0,

    SubscriptionIdentifiersNotSupported = 0xa1,

    WildcardSubscriptionsNotSupported = 0xa2,
}

impl ReasonCode {
    /// Whether this code indicates successful completion.
    #[must_use]
    pub const fn is_success(self) -> bool {
        (self as u8) < 0x80
    }
}

impl TryFrom<u8> for ReasonCode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::GrantedQoS1),
            0x02 => Ok(Self::GrantedQoS2),
            0x04 => Ok(Self::DisconnectWithWillMessage),
            0x10 => Ok(Self::NoMatchingSubscribers),
            0x11 => Ok(Self::NoSubscriptionExisted),
            0x18 => Ok(Self::ContinueAuthentication),
            0x19 => Ok(Self::ReAuthenticate),
            0x80 => Ok(Self::UnspecifiedError),
            0x81 => Ok(Self::MalformedPacket),
            0x82 => Ok(Self::ProtocolError),
            0x83 => Ok(Self::ImplementationSpecificError),
            0x84 => Ok(Self::UnsupportedProtocolVersion),
            0x85 => Ok(Self::ClientIdentifierNotValid),
            0x86 => Ok(Self::BadUserNameOrPassword),
            0x87 => Ok(Self::NotAuthorized),
            0x88 => Ok(Self::ServerUnavailable),
            0x89 => Ok(Self::ServerBusy),
            0x8a => Ok(Self::Banned),
            0x8b => Ok(Self::ServerShuttingDown),
            0x8c => Ok(Self::BadAuthenticationMethod),
            0x8d => Ok(Self::KeepAliveTimeout),
            0x8e => Ok(Self::SessionTakenOver),
            0x8f => Ok(Self::TopicFilterInvalid),
            0x90 => Ok(Self::TopicNameInvalid),
            0x91 => Ok(Self::PacketIdentifierInUse),
            0x92 => Ok(Self::PacketIdentifierNotFound),
            0x93 => Ok(Self::ReceiveMaximumExceeded),
            0x94 => Ok(Self::TopicAliasInvalid),
            0x95 => Ok(Self::PacketTooLarge),
            0x96 => Ok(Self::MessageRateTooHigh),
            0x97 => Ok(Self::QuotaExceeded),
            0x98 => Ok(Self::AdministrativeAction),
            0x99 => Ok(Self::PayloadFormatInvalid),
            0x9a => Ok(Self::RetainNotSupported),
            0x9b => Ok(Self::QoSNotSupported),
            0x9c => Ok(Self::UseAnotherServer),
            0x9d => Ok(Self::ServerMoved),
            0x9e => Ok(Self::SharedSubscriptionsNotSupported),
            0x9f => Ok(Self::ConnectionRateExceeded),
            0xa0 => Ok(Self::MaximumConnectTime),
            0xa1 => Ok(Self::SubscriptionIdentifiersNotSupported),
            0xa2 => Ok(Self::WildcardSubscriptionsNotSupported),
            _ => Err(Error::InvalidReasonCode),
        }
    }
}

/// Convert granted QoS into a SUBACK reason code.
#[must_use]
pub const fn qos_to_reason_code(qos: crate::QoS) -> ReasonCode {
    match qos {
        crate::QoS::AtMostOnce => ReasonCode::Success,
        crate::QoS::AtLeastOnce => ReasonCode::GrantedQoS1,
        crate::QoS::ExactOnce => ReasonCode::GrantedQoS2,
    }
}
