// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! This module provides the definition of I/O interfaces.
//!
//! The engine owns no socket. It exchanges raw TLS record bytes through a
//! [`MemoryPort`], and a transport implementing [`IO`] moves them to and
//! from the wire.

use std::collections::VecDeque;
use std::io::{Read, Write};

/// Support for errors.
pub mod error;
pub use error::{IntoTransportStatus, TransportStatus};

/// An IO interface that implements both [`Read`] and [`Write`] traits.
pub trait IO: Read + Write {}
impl<T> IO for T where T: Read + Write {}

/// A pair of in-memory byte queues standing between the cipher layer and the
/// transport.
///
/// Reading drains the inbound queue and returns
/// [`std::io::ErrorKind::WouldBlock`] when it is empty, unless the inbound
/// direction was closed, in which case it returns 0.
/// Writing appends to the outbound queue and never blocks.
#[derive(Default, Debug)]
pub struct MemoryPort {
    /// Bytes received from the transport, not yet consumed.
    inbound: VecDeque<u8>,

    /// Bytes produced for the transport, not yet drained.
    outbound: VecDeque<u8>,

    /// True once the transport reported end of stream.
    inbound_closed: bool,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the transport.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Marks the inbound direction as closed.
    pub fn close_inbound(&mut self) {
        self.inbound_closed = true;
    }

    /// Removes and returns every outbound byte.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        self.outbound.drain(..).collect()
    }

    /// Returns the number of inbound bytes not yet consumed.
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Returns the number of outbound bytes not yet drained.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Returns true once the inbound direction is closed.
    pub fn is_inbound_closed(&self) -> bool {
        self.inbound_closed
    }
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.inbound.is_empty() {
            return if self.inbound_closed {
                Ok(0)
            } else {
                Err(std::io::ErrorKind::WouldBlock.into())
            };
        }
        let (front, _) = self.inbound.as_slices();
        let n = std::cmp::min(front.len(), buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        self.inbound.drain(..n);
        Ok(n)
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.outbound.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A simple IO implementation, backed by mpsc channels.
///
/// Two linked [`MpscIO`] behave like the two ends of a non-blocking
/// connection: reads return [`std::io::ErrorKind::WouldBlock`] when nothing
/// was sent, and [`std::io::ErrorKind::ConnectionAborted`] once the other
/// end is dropped.
pub mod mpsc {
    use std::io::{ErrorKind as IOErrorKind, Result as IOResult};
    use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

    type Buffer = Vec<u8>;

    pub struct MpscIO {
        /// Write stream.
        write_stream: Option<Sender<Buffer>>,

        /// Read stream.
        read_stream: Option<Receiver<Buffer>>,

        /// Buffer.
        buffer: Buffer,
    }

    impl std::fmt::Debug for MpscIO {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "MpscIO")
        }
    }

    impl Default for MpscIO {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MpscIO {
        /// Instantiates a new, unlinked MpscIO.
        pub fn new() -> Self {
            Self {
                write_stream: None,
                read_stream: None,
                buffer: Buffer::new(),
            }
        }

        /// Links two MpscIO together.
        pub fn link_with(&mut self, other: &mut Self) {
            (self.write_stream, other.read_stream) = {
                let (s, r) = mpsc::channel();
                (Some(s), Some(r))
            };
            (other.write_stream, self.read_stream) = {
                let (s, r) = mpsc::channel();
                (Some(s), Some(r))
            };
        }

        /// Creates a pair of linked MpscIO.
        pub fn new_pair() -> (Self, Self) {
            let mut left = Self::new();
            let mut right = Self::new();
            left.link_with(&mut right);
            (left, right)
        }

        /// Drops the write side, so the peer reads a closed stream.
        pub fn close(&mut self) {
            self.write_stream = None;
        }
    }

    impl std::io::Read for MpscIO {
        fn read(&mut self, buf: &mut [u8]) -> IOResult<usize> {
            if self.buffer.is_empty() {
                let read_stream = self.read_stream.as_ref().ok_or(IOErrorKind::WouldBlock)?;
                match read_stream.try_recv() {
                    Ok(new_buffer) => self.buffer = new_buffer,
                    Err(TryRecvError::Empty) => return Err(IOErrorKind::WouldBlock.into()),
                    Err(TryRecvError::Disconnected) => {
                        return Err(IOErrorKind::ConnectionAborted.into())
                    }
                }
            }
            let n = std::cmp::min(buf.len(), self.buffer.len());
            buf[..n].copy_from_slice(&self.buffer[..n]);
            self.buffer.drain(..n);
            Ok(n)
        }
    }

    impl std::io::Write for MpscIO {
        fn write(&mut self, buf: &[u8]) -> IOResult<usize> {
            let write_stream = self.write_stream.as_ref().ok_or(IOErrorKind::BrokenPipe)?;
            write_stream
                .send(buf.into())
                .map(|_| buf.len())
                .map_err(|_| IOErrorKind::ConnectionAborted.into())
        }

        fn flush(&mut self) -> IOResult<()> {
            Ok(())
        }
    }
}

pub use mpsc::MpscIO;
