// Copyright 2026 flashproto contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The byte-oriented, half-duplex serial channel the protocol engine talks
//! over, expressed as a trait so the engine can be driven by a real port or
//! by an in-memory double in tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::constants::{BAUD_SETTLE_MS, TRANSPORT_BUFFER_MIN};
use crate::error::{Error, Result};

/// A half-duplex byte channel to a bootloader-mode device.
///
/// Callers treat the receive side as a FIFO snapshot: [`Transport::available`]
/// and [`Transport::read_all`] never block, and [`Transport::clear_input`]
/// discards whatever is currently buffered before a new request is sent.
pub trait Transport {
    /// Change the baud rate of an already-open channel.
    fn set_baud(&mut self, baud: u32) -> Result<()>;

    /// Write `bytes` in full.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Number of bytes currently buffered and ready to read.
    fn available(&mut self) -> Result<usize>;

    /// Read and return every byte currently buffered, without blocking.
    fn read_all(&mut self) -> Result<Vec<u8>>;

    /// Discard any buffered incoming bytes.
    fn clear_input(&mut self) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}

/// A [`Transport`] backed by a real serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud`, configured 8 data bits / no parity / 1 stop bit
    /// / no flow control, as every bootloader revision of this protocol
    /// expects.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| Error::PortUnavailable(io::Error::new(io::ErrorKind::Other, e)))?;

        log::debug!("opened serial port `{path}` at {baud} baud");

        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn set_baud(&mut self, baud: u32) -> Result<()> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        std::thread::sleep(Duration::from_millis(BAUD_SETTLE_MS));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        let n = self
            .port
            .bytes_to_read()
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        Ok(n as usize)
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        let n = self.available()?.min(TRANSPORT_BUFFER_MIN.max(REPLY_CEILING));
        let mut buf = vec![0u8; n];
        let mut read = 0;
        while read < n {
            match self.port.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(k) => read += k,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        buf.truncate(read);
        Ok(buf)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))
    }

    fn close(&mut self) {
        // serialport::SerialPort has no explicit close; dropping the boxed
        // port releases the underlying file descriptor/handle.
    }
}

/// Upper bound on a single non-blocking read, independent of the buffer
/// size reported by the OS (guards against a misbehaving driver).
const REPLY_CEILING: usize = crate::constants::REPLY_MAX + 2;

/// List the serial ports currently present on the system.
///
/// This core never enumerates ports itself beyond this passthrough; a GUI
/// or CLI collaborator is expected to drive port selection UI around it.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// An in-memory [`Transport`] double for tests.
///
/// Scripted replies are enqueued with [`MockTransport::push_reply`]; writes
/// are recorded for assertions. [`MockTransport::available`]/`read_all`
/// only ever see bytes that have been explicitly made visible via
/// [`MockTransport::deliver_next`], which models the bounded-wait behavior
/// of a real port where bytes trickle in over time.
#[cfg(test)]
#[derive(Default)]
pub struct MockTransport {
    pub baud: u32,
    pub writes: Vec<Vec<u8>>,
    pending_replies: std::collections::VecDeque<Vec<u8>>,
    visible: Vec<u8>,
    closed: bool,
    fail_io: bool,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full reply buffer to become visible on the next poll.
    pub fn push_reply(&mut self, reply: Vec<u8>) {
        self.pending_replies.push_back(reply);
    }

    /// Make every subsequent channel operation fail with [`Error::Io`],
    /// simulating a port that has dropped out from under the caller.
    pub fn fail_io(&mut self) {
        self.fail_io = true;
    }

    fn io_error() -> Result<()> {
        Err(Error::Io(io::Error::new(io::ErrorKind::Other, "mock transport I/O failure")))
    }

    /// Make the next queued reply visible to `available`/`read_all`, if any.
    fn deliver_next(&mut self) {
        if self.visible.is_empty() {
            if let Some(reply) = self.pending_replies.pop_front() {
                self.visible = reply;
            }
        }
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn set_baud(&mut self, baud: u32) -> Result<()> {
        if self.fail_io {
            return Self::io_error();
        }
        self.baud = baud;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.fail_io {
            return Self::io_error();
        }
        self.writes.push(bytes.to_vec());
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        if self.fail_io {
            return Self::io_error().map(|_| 0usize);
        }
        self.deliver_next();
        Ok(self.visible.len())
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        if self.fail_io {
            return Self::io_error().map(|_| Vec::<u8>::new());
        }
        self.deliver_next();
        Ok(std::mem::take(&mut self.visible))
    }

    fn clear_input(&mut self) -> Result<()> {
        if self.fail_io {
            return Self::io_error();
        }
        self.visible.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
