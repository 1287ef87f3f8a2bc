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

//! Small helpers that each query a single identity opcode and decode its
//! payload, used by [`crate::session`] while connecting.

use crate::client;
use crate::constants::{
    GET_BL_REV, GET_DES, GET_FLASH_STRC, GET_FW_SIZE, GET_ID, GET_REV, GET_SN, GET_UDID,
};
use crate::descriptor::{self, FlashSector};
use crate::error::Result;
use crate::framer::Verdict;
use crate::transport::Transport;

/// A successfully read snapshot of everything the device told us about
/// itself during connect.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub udid: Option<[u8; 12]>,
    pub fw_size: Option<u32>,
    pub bl_rev: Option<String>,
    pub board_id: Option<String>,
    pub serial_number: Option<String>,
    pub hw_rev: Option<String>,
    pub description: Option<String>,
    pub sectors: Vec<FlashSector>,
    /// Non-fatal problems encountered while reading identity, in the
    /// order they occurred: a failed read, or a descriptor parse warning.
    pub warnings: Vec<String>,
}

fn read_raw(
    transport: &mut dyn Transport,
    opcode: u8,
    timeout_ms: u64,
    yield_cb: &mut dyn FnMut(),
) -> Result<Option<Vec<u8>>> {
    match client::send_command(transport, opcode, &[], timeout_ms, yield_cb)? {
        Verdict::Ok(payload) => Ok(Some(payload)),
        _ => Ok(None),
    }
}

fn read_text(
    transport: &mut dyn Transport,
    opcode: u8,
    timeout_ms: u64,
    yield_cb: &mut dyn FnMut(),
) -> Result<Option<String>> {
    Ok(read_raw(transport, opcode, timeout_ms, yield_cb)?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

/// Run every identity reader in the fixed order the protocol expects:
/// UDID, FW_SIZE, BL_REV, ID, SN, REV, DES, FLASH_STRC.
///
/// A failure of any individual read is non-fatal: it's recorded in
/// [`Identity::warnings`] and the corresponding field is left `None`.
pub fn read_all(
    transport: &mut dyn Transport,
    yield_cb: &mut dyn FnMut(),
) -> Result<Identity> {
    let mut identity = Identity::default();

    match read_raw(transport, GET_UDID, 20, yield_cb)? {
        Some(payload) if payload.len() == 12 => {
            let mut udid = [0u8; 12];
            udid.copy_from_slice(&payload);
            udid.reverse();
            identity.udid = Some(udid);
        }
        Some(_) => identity
            .warnings
            .push("GET_UDID returned an unexpected payload length".to_owned()),
        None => identity.warnings.push("GET_UDID failed or timed out".to_owned()),
    }

    match read_raw(transport, GET_FW_SIZE, 20, yield_cb)? {
        Some(payload) if payload.len() == 4 => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&payload);
            identity.fw_size = Some(u32::from_le_bytes(bytes));
        }
        Some(_) => identity
            .warnings
            .push("GET_FW_SIZE returned an unexpected payload length".to_owned()),
        None => identity
            .warnings
            .push("GET_FW_SIZE failed or timed out".to_owned()),
    }

    identity.bl_rev = read_text(transport, GET_BL_REV, 20, yield_cb)?;
    if identity.bl_rev.is_none() {
        identity
            .warnings
            .push("GET_BL_REV failed or timed out".to_owned());
    }

    identity.board_id = read_text(transport, GET_ID, 20, yield_cb)?;
    if identity.board_id.is_none() {
        identity.warnings.push("GET_ID failed or timed out".to_owned());
    }

    identity.serial_number = read_text(transport, GET_SN, 20, yield_cb)?;
    if identity.serial_number.is_none() {
        identity.warnings.push("GET_SN failed or timed out".to_owned());
    }

    identity.hw_rev = read_text(transport, GET_REV, 20, yield_cb)?;
    if identity.hw_rev.is_none() {
        identity.warnings.push("GET_REV failed or timed out".to_owned());
    }

    identity.description = read_text(transport, GET_DES, 100, yield_cb)?;
    if identity.description.is_none() {
        identity.warnings.push("GET_DES failed or timed out".to_owned());
    }

    match read_text(transport, GET_FLASH_STRC, 100, yield_cb)? {
        Some(text) => match descriptor::parse(&text) {
            Ok((sectors, mut warnings)) => {
                identity.sectors = sectors;
                identity.warnings.append(&mut warnings);
            }
            Err(e) => identity
                .warnings
                .push(format!("GET_FLASH_STRC descriptor malformed: {e}")),
        },
        None => identity
            .warnings
            .push("GET_FLASH_STRC failed or timed out".to_owned()),
    }

    Ok(identity)
}

/// Render a UDID as uppercase hex, in the device's already-reversed
/// presentation order.
pub fn udid_to_string(udid: &[u8; 12]) -> String {
    udid.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn udid_is_byte_reversed_before_presentation() {
        let payload: [u8; 12] = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
        ];
        let mut transport = MockTransport::new();
        let mut reply = payload.to_vec();
        reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(reply);

        let mut yield_cb = || {};
        let payload = read_raw(&mut transport, GET_UDID, 20, &mut yield_cb)
            .unwrap()
            .unwrap();
        let mut udid = [0u8; 12];
        udid.copy_from_slice(&payload);
        udid.reverse();

        assert_eq!(udid_to_string(&udid), "0C0B0A090807060504030201");
    }

    #[test]
    fn fw_size_decodes_little_endian() {
        let mut transport = MockTransport::new();
        transport.push_reply(vec![0x00, 0x00, 0x02, 0x00, 0xA5, 0x10]);

        let mut yield_cb = || {};
        let payload = read_raw(&mut transport, GET_FW_SIZE, 20, &mut yield_cb)
            .unwrap()
            .unwrap();
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&payload);
        assert_eq!(u32::from_le_bytes(bytes), 131072);
    }

    #[test]
    fn failed_read_is_recorded_as_a_warning_not_an_error() {
        let mut transport = MockTransport::new();
        let mut yield_cb = || {};

        let identity = read_all(&mut transport, &mut yield_cb).unwrap();
        assert!(identity.udid.is_none());
        assert!(!identity.warnings.is_empty());
    }
}
