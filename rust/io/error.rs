// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! IO errors module.

use std::io::{Error, ErrorKind};

/// What a transport error means for the session driving it.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum TransportStatus {
    /// No progress possible right now. Not an error.
    WouldBlock,

    /// The other end went away.
    Closed,

    /// Any other failure.
    Failed,
}

/// Types that can be converted to a [`TransportStatus`].
pub trait IntoTransportStatus {
    /// Convert the type to a TransportStatus.
    fn into_transport_status(self) -> TransportStatus;
}

impl IntoTransportStatus for ErrorKind {
    fn into_transport_status(self) -> TransportStatus {
        match self {
            Self::WouldBlock | Self::WriteZero | Self::Interrupted | Self::NotConnected => {
                TransportStatus::WouldBlock
            }
            Self::ConnectionReset
            | Self::ConnectionAborted
            | Self::BrokenPipe
            | Self::UnexpectedEof => TransportStatus::Closed,
            _ => TransportStatus::Failed,
        }
    }
}

impl IntoTransportStatus for Error {
    fn into_transport_status(self) -> TransportStatus {
        self.kind().into_transport_status()
    }
}

impl IntoTransportStatus for &Error {
    fn into_transport_status(self) -> TransportStatus {
        self.kind().into_transport_status()
    }
}
