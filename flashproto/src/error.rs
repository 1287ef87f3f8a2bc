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

use std::io;

/// The phase a [`Error::Timeout`] occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Command,
    Erase,
    Program,
    Verify,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Command => "command",
            Phase::Erase => "erase",
            Phase::Program => "program",
            Phase::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// Reason an image was rejected before any bytes were sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageInvalidReason {
    /// Length is not a multiple of 4 bytes.
    NotWordAligned,
    /// Length exceeds the device's reported firmware region size.
    TooLarge,
}

impl std::fmt::Display for ImageInvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImageInvalidReason::NotWordAligned => {
                "length is not a multiple of 4 bytes"
            }
            ImageInvalidReason::TooLarge => {
                "length exceeds the device's firmware region size"
            }
        };
        f.write_str(s)
    }
}

/// Errors produced by the protocol engine and flashing session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("couldn't open serial port: {0}")]
    PortUnavailable(#[source] io::Error),

    #[error("no baud rate synchronized with the bootloader")]
    NoSync,

    #[error("session is not connected to a device")]
    NotConnected,

    #[error("timed out waiting for a reply during {phase}")]
    Timeout { phase: Phase },

    #[error("device reported the command as invalid")]
    CommandInvalid,

    #[error("device reported the command as failed")]
    CommandFailed,

    #[error("firmware image is invalid: {reason}")]
    ImageInvalid { reason: ImageInvalidReason },

    #[error("checksum mismatch: expected {expected:#010X}, device reported {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("flash structure descriptor malformed at byte offset {offset}")]
    DescriptorMalformed { offset: usize },

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
