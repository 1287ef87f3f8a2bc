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

//! Baud-rate auto-detection: probe a fixed ladder with `GET_SYNC` until one
//! of them gets an acknowledged reply.

use crate::client;
use crate::constants::{BAUD_LADDER, GET_SYNC, SYNC_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::framer::Verdict;
use crate::transport::Transport;

/// Try each rate in [`BAUD_LADDER`] in order, returning the first one that
/// gets an `Ok` reply to `GET_SYNC`. Fails with [`Error::NoSync`] if the
/// whole ladder is exhausted.
pub fn detect(
    transport: &mut dyn Transport,
    yield_cb: &mut dyn FnMut(),
) -> Result<u32> {
    for &baud in &BAUD_LADDER {
        log::debug!("baud auto-detect: trying {baud}");
        transport.set_baud(baud)?;

        let verdict =
            client::send_command(transport, GET_SYNC, &[], SYNC_TIMEOUT_MS, yield_cb)?;

        if let Verdict::Ok(_) = verdict {
            log::debug!("baud auto-detect: found {baud}");
            return Ok(baud);
        }
    }

    Err(Error::NoSync)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn finds_baud_in_ladder_order() {
        let mut transport = MockTransport::new();
        transport.push_reply(vec![0xA5, 0x10]);
        let mut yield_cb = || {};

        // With a reply queued immediately, the first rung in the ladder
        // succeeds and detection stops there.
        let baud = detect(&mut transport, &mut yield_cb).unwrap();
        assert_eq!(baud, BAUD_LADDER[0]);
    }

    #[test]
    fn exhausts_ladder_into_no_sync() {
        let mut transport = MockTransport::new();
        let mut yield_cb = || {};
        let err = detect(&mut transport, &mut yield_cb).unwrap_err();
        assert!(matches!(err, Error::NoSync));
    }
}
