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

//! Wire-level protocol constants for the INSYNC/EOC serial bootloader.
//!
//! Every value here is normative; see the protocol's reply trailer and
//! command opcode tables.

/// First byte of every reply trailer.
pub const INSYNC: u8 = 0xA5;
/// End-of-command marker terminating every request.
pub const EOC: u8 = 0xF7;
/// Second trailer byte: operation succeeded.
pub const OK: u8 = 0x10;
/// Second trailer byte: operation failed.
pub const FAILED: u8 = 0x11;
/// Second trailer byte: command not recognized.
pub const INVALID: u8 = 0x13;

/// Ping; reply has an empty payload.
pub const GET_SYNC: u8 = 0x21;
/// Payload: 12 raw bytes of chip unique ID.
pub const GET_UDID: u8 = 0x31;
/// Payload: 4-byte little-endian firmware region size.
pub const GET_FW_SIZE: u8 = 0x32;
/// Payload: ASCII bootloader version.
pub const GET_BL_REV: u8 = 0x41;
/// Payload: ASCII/locale board identifier.
pub const GET_ID: u8 = 0x42;
/// Payload: ASCII serial number.
pub const GET_SN: u8 = 0x43;
/// Payload: ASCII hardware revision.
pub const GET_REV: u8 = 0x44;
/// Payload: ASCII flash-structure descriptor, see [`crate::descriptor`].
pub const GET_FLASH_STRC: u8 = 0x45;
/// Payload: ASCII free-form device description.
pub const GET_DES: u8 = 0x46;
/// No payload; may take seconds to complete.
pub const CHIP_ERASE: u8 = 0x51;
/// Body: `[len:1][data:len]`; writes at the current program pointer.
pub const PROG_MULTI: u8 = 0x52;
/// Payload: 4-byte little-endian CRC32 of the whole firmware region.
pub const GET_CRC: u8 = 0x53;
/// No payload; device jumps to the application.
pub const BOOT: u8 = 0x54;

/// Baud-rate ladder probed by auto-detection, in order.
pub const BAUD_LADDER: [u32; 7] =
    [256000, 115200, 57600, 38400, 19200, 14400, 9600];

/// Maximum total `PROG_MULTI` body size, including the 1-byte length prefix.
pub const PROG_CHUNK_MAX: usize = 64;

/// Largest firmware payload carried by a single `PROG_MULTI` command.
pub const PROG_PAYLOAD_MAX: usize = (PROG_CHUNK_MAX - 1) * 4;

/// Ceiling on payload + trailer bytes in any single reply.
pub const REPLY_MAX: usize = 255;

/// Minimum receive buffer size callers may rely on.
pub const TRANSPORT_BUFFER_MIN: usize = 2048;

/// Erase polling budget, in 10ms polls (10s total).
pub const MAX_ERASE_POLLS: u32 = 1000;
/// CRC-reply polling budget, in 10ms polls (5s total).
pub const MAX_CRC_POLLS: u32 = 500;

/// Polling interval used by erase/program/CRC waits.
pub const POLL_INTERVAL_MS: u64 = 10;

/// Immediate wait before polling starts on chip erase.
pub const ERASE_INITIAL_WAIT_MS: u64 = 50;
/// Immediate wait before polling starts on CRC verification.
pub const CRC_INITIAL_WAIT_MS: u64 = 50;
/// Per-chunk `PROG_MULTI` acknowledgement polling budget, in 10ms polls (1s total).
pub const MAX_PROG_CHUNK_POLLS: u32 = 100;
/// Timeout used for the `BOOT` command.
pub const BOOT_TIMEOUT_MS: u64 = 50;
/// Timeout used for a single `GET_SYNC` probe during baud detection.
pub const SYNC_TIMEOUT_MS: u64 = 50;

/// Settle delay inserted after changing the transport baud rate.
pub const BAUD_SETTLE_MS: u64 = 10;
