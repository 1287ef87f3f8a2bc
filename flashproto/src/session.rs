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

//! The flashing state machine: connect, identify, erase, program, verify,
//! boot. Everything above this module composes into the single façade a
//! collaborator (CLI or otherwise) drives.

use crate::baud;
use crate::client;
use crate::constants::{
    BOOT, BOOT_TIMEOUT_MS, CHIP_ERASE, CRC_INITIAL_WAIT_MS, ERASE_INITIAL_WAIT_MS, GET_CRC,
    GET_SYNC, MAX_CRC_POLLS, MAX_ERASE_POLLS, MAX_PROG_CHUNK_POLLS, POLL_INTERVAL_MS,
    PROG_MULTI, PROG_PAYLOAD_MAX, SYNC_TIMEOUT_MS,
};
use crate::crc32;
use crate::error::{Error, ImageInvalidReason, Phase, Result};
use crate::framer::Verdict;
use crate::identity::{self, Identity};
use crate::transport::{SerialTransport, Transport};

/// How a connection should settle on a baud rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudPolicy {
    /// Probe [`crate::constants::BAUD_LADDER`] until one rung syncs.
    Auto,
    /// Use this rate and sync once; fail with [`Error::NoSync`] otherwise.
    Fixed(u32),
}

/// Where a [`Session`] currently is in the flashing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Identifying,
    Idle,
    Erasing,
    Programming,
    Verifying,
    Booting,
}

/// The phase a progress tick belongs to, distinct from [`Phase`] which also
/// covers the non-progress-reporting `Command` case (e.g. `BOOT`, `GET_SYNC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Erase,
    Program,
    Verify,
}

/// A live (or formerly live) connection to a device in bootloader mode.
///
/// Produced by [`Session::connect`]; `erase`/`program`/`boot`/`disconnect`
/// operate on it afterwards. A disconnected session is a legal, inert value:
/// calling `disconnect` again, or calling an operation that requires a
/// transport, is a well-defined [`Error::NotConnected`] rather than a panic.
pub struct Session {
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    port_name: Option<String>,
    baud_rate: Option<u32>,
    identity: Identity,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session {
            transport: None,
            state: SessionState::Disconnected,
            port_name: None,
            baud_rate: None,
            identity: Identity::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Open `port` and run the connect sequence: sync at the chosen baud,
    /// then read every identity field in fixed order.
    pub fn connect(
        &mut self,
        port: &str,
        baud_policy: BaudPolicy,
        yield_cb: &mut dyn FnMut(),
    ) -> Result<()> {
        let probe_baud = match baud_policy {
            BaudPolicy::Auto => crate::constants::BAUD_LADDER[0],
            BaudPolicy::Fixed(baud) => baud,
        };
        let transport = SerialTransport::open(port, probe_baud)?;
        self.connect_with(Box::new(transport), port.to_owned(), baud_policy, yield_cb)
    }

    /// The testable core of [`Session::connect`], parameterized over any
    /// [`Transport`] so it can be driven by a mock in tests.
    fn connect_with(
        &mut self,
        mut transport: Box<dyn Transport>,
        port_name: String,
        baud_policy: BaudPolicy,
        yield_cb: &mut dyn FnMut(),
    ) -> Result<()> {
        self.state = SessionState::Connecting;

        match self.run_connect_sequence(transport.as_mut(), baud_policy, yield_cb) {
            Ok((baud_rate, identity)) => {
                self.transport = Some(transport);
                self.port_name = Some(port_name);
                self.baud_rate = Some(baud_rate);
                self.identity = identity;
                self.state = SessionState::Idle;
                Ok(())
            }
            Err(e) => {
                transport.close();
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Sync at the chosen baud, then read every identity field. Any failure
    /// here — protocol or transport I/O — is reported to `connect_with`,
    /// which closes `transport` and resets to [`SessionState::Disconnected`].
    fn run_connect_sequence(
        &mut self,
        transport: &mut dyn Transport,
        baud_policy: BaudPolicy,
        yield_cb: &mut dyn FnMut(),
    ) -> Result<(u32, Identity)> {
        let baud_rate = match baud_policy {
            BaudPolicy::Auto => baud::detect(transport, yield_cb)?,
            BaudPolicy::Fixed(baud) => {
                transport.set_baud(baud)?;
                let verdict =
                    client::send_command(transport, GET_SYNC, &[], SYNC_TIMEOUT_MS, yield_cb)?;
                if !matches!(verdict, Verdict::Ok(_)) {
                    return Err(Error::NoSync);
                }
                baud
            }
        };

        self.state = SessionState::Identifying;
        let identity = identity::read_all(transport, yield_cb)?;
        Ok((baud_rate, identity))
    }

    /// Run `client::poll_command` against the connected transport. Any error
    /// — including a genuine I/O failure — closes the transport and resets
    /// the session to [`SessionState::Disconnected`] before propagating.
    fn poll_guarded(
        &mut self,
        opcode: u8,
        body: &[u8],
        initial_wait_ms: u64,
        interval_ms: u64,
        max_polls: u32,
        yield_cb: &mut dyn FnMut(),
        on_tick: impl FnMut(u32, u32),
    ) -> Result<Verdict> {
        let transport = self.transport.as_deref_mut().ok_or(Error::NotConnected)?;
        match client::poll_command(
            transport,
            opcode,
            body,
            initial_wait_ms,
            interval_ms,
            max_polls,
            yield_cb,
            on_tick,
        ) {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Run `client::send_command` against the connected transport, with the
    /// same disconnect-on-I/O-error behavior as [`Session::poll_guarded`].
    fn send_guarded(
        &mut self,
        opcode: u8,
        body: &[u8],
        timeout_ms: u64,
        yield_cb: &mut dyn FnMut(),
    ) -> Result<Verdict> {
        let transport = self.transport.as_deref_mut().ok_or(Error::NotConnected)?;
        match client::send_command(transport, opcode, body, timeout_ms, yield_cb) {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Send `CHIP_ERASE` and poll for completion, reporting a tick for every
    /// 10ms poll (including the one taken immediately after the initial wait).
    pub fn erase(
        &mut self,
        yield_cb: &mut dyn FnMut(),
        mut on_progress: impl FnMut(ProgressPhase, u32, u32),
    ) -> Result<()> {
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }
        self.state = SessionState::Erasing;

        let verdict = self.poll_guarded(
            CHIP_ERASE,
            &[],
            ERASE_INITIAL_WAIT_MS,
            POLL_INTERVAL_MS,
            MAX_ERASE_POLLS,
            yield_cb,
            |done, total| on_progress(ProgressPhase::Erase, done, total),
        )?;

        self.state = SessionState::Idle;
        verdict_to_result(verdict, Phase::Erase)
    }

    /// Erase, then stream `image` in `PROG_MULTI` chunks, then verify via
    /// CRC32. Aborts without touching the device if the image fails its
    /// preconditions.
    pub fn program(
        &mut self,
        image: &[u8],
        yield_cb: &mut dyn FnMut(),
        mut on_progress: impl FnMut(ProgressPhase, u32, u32),
    ) -> Result<()> {
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }
        if image.is_empty() || image.len() % 4 != 0 {
            return Err(Error::ImageInvalid {
                reason: ImageInvalidReason::NotWordAligned,
            });
        }

        let fw_size = self.identity.fw_size.unwrap_or(0);
        if image.len() as u32 > fw_size {
            return Err(Error::ImageInvalid {
                reason: ImageInvalidReason::TooLarge,
            });
        }

        self.erase(yield_cb, |phase, done, total| {
            on_progress(phase, done, total)
        })?;

        self.state = SessionState::Programming;

        let n_chunks = ((image.len() + PROG_PAYLOAD_MAX - 1) / PROG_PAYLOAD_MAX) as u32;
        for (i, chunk) in image.chunks(PROG_PAYLOAD_MAX).enumerate() {
            let mut body = Vec::with_capacity(1 + chunk.len());
            body.push(chunk.len() as u8);
            body.extend_from_slice(chunk);

            // Per-chunk ack is polled rather than a single fixed wait: most
            // chunks come back within a poll or two, well under the 1s budget.
            let verdict = self.poll_guarded(
                PROG_MULTI,
                &body,
                POLL_INTERVAL_MS,
                POLL_INTERVAL_MS,
                MAX_PROG_CHUNK_POLLS,
                yield_cb,
                |_, _| {},
            )?;

            if let Err(e) = verdict_to_result(verdict, Phase::Program) {
                self.state = SessionState::Idle;
                return Err(e);
            }
            on_progress(ProgressPhase::Program, i as u32 + 1, n_chunks);
        }

        self.state = SessionState::Verifying;
        let expected_crc = crc32::compute_with_fill(image, fw_size as usize);

        let verdict = self.poll_guarded(
            GET_CRC,
            &[],
            CRC_INITIAL_WAIT_MS,
            POLL_INTERVAL_MS,
            MAX_CRC_POLLS,
            yield_cb,
            |done, total| on_progress(ProgressPhase::Verify, done, total),
        )?;
        self.state = SessionState::Idle;

        match verdict {
            Verdict::Ok(payload) if payload.len() == 4 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&payload);
                let actual = u32::from_le_bytes(bytes);
                if actual == expected_crc {
                    Ok(())
                } else {
                    Err(Error::ChecksumMismatch {
                        expected: expected_crc,
                        actual,
                    })
                }
            }
            Verdict::Ok(_) => Err(Error::CommandFailed),
            other => verdict_to_result(other, Phase::Verify),
        }
    }

    /// Send `BOOT`; on success the device jumps to the application and the
    /// session disconnects, since nothing is listening as a bootloader
    /// anymore.
    pub fn boot(&mut self, yield_cb: &mut dyn FnMut()) -> Result<()> {
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }
        self.state = SessionState::Booting;

        let verdict = self.send_guarded(BOOT, &[], BOOT_TIMEOUT_MS, yield_cb)?;
        match verdict {
            Verdict::Ok(_) => {
                self.disconnect();
                Ok(())
            }
            other => {
                let result = verdict_to_result(other, Phase::Command);
                self.state = SessionState::Idle;
                result
            }
        }
    }

    /// Close the transport, if any, and reset all session state back to its
    /// pre-connect default. Idempotent: disconnecting an already-disconnected
    /// session is a no-op.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.port_name = None;
        self.baud_rate = None;
        self.identity = Identity::default();
        self.state = SessionState::Disconnected;
    }
}

fn verdict_to_result(verdict: Verdict, phase: Phase) -> Result<()> {
    match verdict {
        Verdict::Ok(_) => Ok(()),
        Verdict::Timeout => Err(Error::Timeout { phase }),
        Verdict::Invalid => Err(Error::CommandInvalid),
        Verdict::Failed | Verdict::Malformed => Err(Error::CommandFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn no_yield() -> impl FnMut() {
        || {}
    }

    fn reference_descriptor() -> &'static str {
        "@Internal/0x08000000/02*016Kg,01*064Kg"
    }

    fn queue_sync_and_identity(transport: &mut MockTransport, fw_size: u32) {
        // GET_SYNC
        transport.push_reply(vec![0xA5, 0x10]);
        // GET_UDID
        let mut udid_reply: Vec<u8> = (1..=12).collect();
        udid_reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(udid_reply);
        // GET_FW_SIZE
        let mut fw_reply = fw_size.to_le_bytes().to_vec();
        fw_reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(fw_reply);
        // GET_BL_REV, GET_ID, GET_SN, GET_REV, GET_DES
        for _ in 0..5 {
            transport.push_reply(vec![b'v', b'1', 0xA5, 0x10]);
        }
        // GET_FLASH_STRC
        let mut strc_reply = reference_descriptor().as_bytes().to_vec();
        strc_reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(strc_reply);
    }

    #[test]
    fn connect_with_fixed_baud_populates_identity() {
        let mut transport = MockTransport::new();
        queue_sync_and_identity(&mut transport, 1024);
        let mut yield_cb = no_yield();

        let mut session = Session::new();
        session
            .connect_with(
                Box::new(transport),
                "COM-MOCK".to_owned(),
                BaudPolicy::Fixed(115200),
                &mut yield_cb,
            )
            .unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.port_name(), Some("COM-MOCK"));
        assert_eq!(session.baud_rate(), Some(115200));
        assert_eq!(session.identity().fw_size, Some(1024));
        assert_eq!(session.identity().sectors.len(), 3);
        assert!(session.identity().warnings.is_empty());
    }

    #[test]
    fn connect_with_auto_baud_runs_detector_first() {
        let mut transport = MockTransport::new();
        queue_sync_and_identity(&mut transport, 1024);
        let mut yield_cb = no_yield();

        let mut session = Session::new();
        session
            .connect_with(
                Box::new(transport),
                "COM-MOCK".to_owned(),
                BaudPolicy::Auto,
                &mut yield_cb,
            )
            .unwrap();

        assert_eq!(session.baud_rate(), Some(crate::constants::BAUD_LADDER[0]));
    }

    #[test]
    fn fixed_baud_io_failure_during_sync_disconnects() {
        let mut transport = MockTransport::new();
        transport.fail_io();
        let mut yield_cb = no_yield();

        let mut session = Session::new();
        let err = session
            .connect_with(
                Box::new(transport),
                "COM-MOCK".to_owned(),
                BaudPolicy::Fixed(9600),
                &mut yield_cb,
            )
            .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.transport.is_none());
    }

    #[test]
    fn fixed_baud_failing_to_sync_reports_no_sync_and_disconnects() {
        let transport = MockTransport::new();
        let mut yield_cb = no_yield();

        let mut session = Session::new();
        let err = session
            .connect_with(
                Box::new(transport),
                "COM-MOCK".to_owned(),
                BaudPolicy::Fixed(9600),
                &mut yield_cb,
            )
            .unwrap_err();

        assert!(matches!(err, Error::NoSync));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    fn connected_session(fw_size: u32) -> Session {
        let mut transport = MockTransport::new();
        queue_sync_and_identity(&mut transport, fw_size);
        let mut yield_cb = no_yield();

        let mut session = Session::new();
        session
            .connect_with(
                Box::new(transport),
                "COM-MOCK".to_owned(),
                BaudPolicy::Fixed(115200),
                &mut yield_cb,
            )
            .unwrap();
        session
    }

    #[test]
    fn erase_succeeds_and_reports_a_progress_tick() {
        let mut session = connected_session(1024);
        let mut transport = MockTransport::new();
        transport.push_reply(vec![0xA5, 0x10]);
        session.transport = Some(Box::new(transport));

        let mut ticks = Vec::new();
        let mut yield_cb = no_yield();
        session
            .erase(&mut yield_cb, |phase, done, total| {
                ticks.push((phase, done, total))
            })
            .unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(ticks.first(), Some(&(ProgressPhase::Erase, 0, MAX_ERASE_POLLS)));
    }

    #[test]
    fn erase_without_a_connection_is_not_connected() {
        let mut session = Session::new();
        let mut yield_cb = no_yield();
        let err = session.erase(&mut yield_cb, |_, _, _| {}).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[test]
    fn erase_io_failure_disconnects_session() {
        let mut session = connected_session(1024);
        let mut transport = MockTransport::new();
        transport.fail_io();
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        let err = session.erase(&mut yield_cb, |_, _, _| {}).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.transport.is_none());
    }

    #[test]
    fn erase_timeout_leaves_session_idle() {
        let mut session = connected_session(1024);
        session.transport = Some(Box::new(MockTransport::new()));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        let err = session.erase(&mut yield_cb, |_, _, _| {}).unwrap_err();

        assert!(matches!(err, Error::Timeout { phase: Phase::Erase }));
        assert_eq!(session.state(), SessionState::Idle);
    }

    fn program_transport_for(n_prog_chunks: usize) -> MockTransport {
        let mut transport = MockTransport::new();
        // erase ack
        transport.push_reply(vec![0xA5, 0x10]);
        // one ack per PROG_MULTI chunk
        for _ in 0..n_prog_chunks {
            transport.push_reply(vec![0xA5, 0x10]);
        }
        // CRC reply is filled in per-test since it depends on the image
        transport
    }

    #[test]
    fn program_253_byte_image_is_rejected_as_not_word_aligned() {
        let mut session = connected_session(1024);
        let mut yield_cb = no_yield();
        let image = vec![0u8; 253];

        let err = session
            .program(&image, &mut yield_cb, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ImageInvalid {
                reason: ImageInvalidReason::NotWordAligned
            }
        ));
    }

    #[test]
    fn program_image_larger_than_fw_size_is_rejected() {
        let mut session = connected_session(256);
        let mut yield_cb = no_yield();
        let image = vec![0u8; 512];

        let err = session
            .program(&image, &mut yield_cb, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ImageInvalid {
                reason: ImageInvalidReason::TooLarge
            }
        ));
    }

    #[test]
    fn program_252_byte_image_sends_a_single_chunk() {
        let image = vec![0xAAu8; 252];
        let fw_size = 252u32;

        let mut session = connected_session(fw_size);
        let mut transport = program_transport_for(1);
        let crc = crc32::compute_with_fill(&image, fw_size as usize);
        let mut crc_reply = crc.to_le_bytes().to_vec();
        crc_reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(crc_reply);
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        let mut program_ticks = Vec::new();
        session
            .program(&image, &mut yield_cb, |phase, done, total| {
                if phase == ProgressPhase::Program {
                    program_ticks.push((done, total));
                }
            })
            .unwrap();

        assert_eq!(program_ticks, vec![(1, 1)]);
    }

    #[test]
    fn program_256_byte_image_sends_two_chunks() {
        let image = vec![0x55u8; 256];
        let fw_size = 1024u32;

        let mut session = connected_session(fw_size);
        let mut transport = program_transport_for(2);
        let crc = crc32::compute_with_fill(&image, fw_size as usize);
        let mut crc_reply = crc.to_le_bytes().to_vec();
        crc_reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(crc_reply);
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        let mut program_ticks = Vec::new();
        session
            .program(&image, &mut yield_cb, |phase, done, total| {
                if phase == ProgressPhase::Program {
                    program_ticks.push((done, total))
                }
            })
            .unwrap();

        assert_eq!(program_ticks, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn program_image_exactly_fw_size_succeeds_with_zero_fill() {
        let image = vec![0x11u8; 252];
        let fw_size = 252u32;

        let mut session = connected_session(fw_size);
        let mut transport = program_transport_for(1);
        let crc = crc32::compute(&image);
        let mut crc_reply = crc.to_le_bytes().to_vec();
        crc_reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(crc_reply);
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        session
            .program(&image, &mut yield_cb, |_, _, _| {})
            .unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn program_reports_checksum_mismatch() {
        let image = vec![0x22u8; 252];
        let fw_size = 252u32;

        let mut session = connected_session(fw_size);
        let mut transport = program_transport_for(1);
        let mut crc_reply = 0xDEAD_BEEFu32.to_le_bytes().to_vec();
        crc_reply.extend_from_slice(&[0xA5, 0x10]);
        transport.push_reply(crc_reply);
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        let err = session
            .program(&image, &mut yield_cb, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn boot_succeeds_and_disconnects() {
        let mut session = connected_session(1024);
        let mut transport = MockTransport::new();
        transport.push_reply(vec![0xA5, 0x10]);
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        session.boot(&mut yield_cb).unwrap();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.transport.is_none());
    }

    #[test]
    fn boot_io_failure_disconnects_session() {
        let mut session = connected_session(1024);
        let mut transport = MockTransport::new();
        transport.fail_io();
        session.transport = Some(Box::new(transport));
        session.state = SessionState::Idle;

        let mut yield_cb = no_yield();
        let err = session.boot(&mut yield_cb).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.transport.is_none());
    }

    #[test]
    fn disconnect_after_disconnect_is_a_no_op() {
        let mut session = Session::new();
        session.disconnect();
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn disconnect_clears_identity_and_port() {
        let mut session = connected_session(1024);
        session.disconnect();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.port_name().is_none());
        assert!(session.baud_rate().is_none());
        assert!(session.identity().fw_size.is_none());
    }
}
