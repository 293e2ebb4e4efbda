// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;

use crate::commands::EndpointToBrokerCmd;
use crate::types::EndpointId;

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Invalid packet value.
    PacketError,

    /// Send packet error.
    SendError,

    /// The peer violated the protocol; connection will be closed.
    ProtocolError,

    /// Session with client id not found.
    SessionNotFound,

    /// Endpoint not registered with the broker.
    EndpointNotFound,

    /// All 65535 packet ids of an endpoint are in flight.
    PacketIdExhausted,

    /// mpsc channel error.
    ChannelError,

    /// Config file error.
    ConfigError,

    /// Failed to init logger.
    LoggerError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn endpoint_error(endpoint_id: EndpointId) -> Self {
        Self::from_string(
            ErrorKind::EndpointNotFound,
            format!("Endpoint with id {endpoint_id} not found"),
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<codec::Error> for Error {
    fn from(err: codec::Error) -> Self {
        Self::from_string(ErrorKind::PacketError, format!("{err:?}"))
    }
}

impl From<mpsc::error::SendError<EndpointToBrokerCmd>> for Error {
    fn from(err: mpsc::error::SendError<EndpointToBrokerCmd>) -> Self {
        Self::from_string(
            ErrorKind::ChannelError,
            format!("EndpointToBrokerCmd channel error: {err}"),
        )
    }
}

impl From<mpsc::error::SendError<codec::Packet>> for Error {
    fn from(err: mpsc::error::SendError<codec::Packet>) -> Self {
        Self::from_string(
            ErrorKind::SendError,
            format!("Packet channel error: {err}"),
        )
    }
}
