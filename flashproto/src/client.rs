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

//! The uniform request/response primitive every higher-level operation is
//! built on: encode a frame, wait (or poll), classify the reply.

use std::time::Duration;

use crate::constants::POLL_INTERVAL_MS;
use crate::error::Result;
use crate::framer::{self, Verdict};
use crate::transport::Transport;

/// Sleep for `total_ms`, calling `yield_cb` at least once every 10ms so a
/// collaborator can keep pumping its own event loop / UI while we wait.
fn sleep_cooperative(total_ms: u64, yield_cb: &mut dyn FnMut()) {
    let mut remaining = total_ms;
    while remaining > 0 {
        let step = remaining.min(POLL_INTERVAL_MS.max(1));
        std::thread::sleep(Duration::from_millis(step));
        yield_cb();
        remaining -= step;
    }
}

/// Send `opcode`/`body`, wait up to `timeout_ms`, and return the classified
/// reply. A single fixed wait is used; see module docs on why this suffices
/// for bounded, length-implicit replies.
pub fn send_command(
    transport: &mut dyn Transport,
    opcode: u8,
    body: &[u8],
    timeout_ms: u64,
    yield_cb: &mut dyn FnMut(),
) -> Result<Verdict> {
    let frame = framer::encode(opcode, body);

    transport.clear_input()?;
    transport.write(&frame)?;

    sleep_cooperative(timeout_ms, yield_cb);

    let n = transport.available()?;
    if n == 0 {
        return Ok(Verdict::Timeout);
    }

    let buf = transport.read_all()?;
    Ok(match framer::classify(&buf) {
        Verdict::Empty => Verdict::Timeout,
        verdict => verdict,
    })
}

/// Send `opcode`/`body`, wait `initial_wait_ms`, then poll every
/// `interval_ms` up to `max_polls` additional times, returning the first
/// decisive verdict (anything other than empty/timeout) or [`Verdict::Timeout`]
/// once the budget is exhausted.
///
/// `on_tick(done, total)` is called once before the first poll and again
/// after every subsequent poll, so a caller can surface monotonic progress
/// for long-running commands (erase, CRC, per-chunk program acks).
///
/// Used for commands whose completion time is unpredictable (erase, CRC,
/// per-chunk program acknowledgement) where a single fixed wait would be
/// either too short or wastefully long.
pub fn poll_command(
    transport: &mut dyn Transport,
    opcode: u8,
    body: &[u8],
    initial_wait_ms: u64,
    interval_ms: u64,
    max_polls: u32,
    yield_cb: &mut dyn FnMut(),
    mut on_tick: impl FnMut(u32, u32),
) -> Result<Verdict> {
    let frame = framer::encode(opcode, body);

    transport.clear_input()?;
    transport.write(&frame)?;

    sleep_cooperative(initial_wait_ms, yield_cb);

    on_tick(0, max_polls);
    if let Some(verdict) = poll_once(transport)? {
        return Ok(verdict);
    }

    for tick in 0..max_polls {
        sleep_cooperative(interval_ms, yield_cb);
        on_tick(tick + 1, max_polls);
        if let Some(verdict) = poll_once(transport)? {
            return Ok(verdict);
        }
    }

    Ok(Verdict::Timeout)
}

/// Take a single non-blocking snapshot; `None` means nothing decisive yet.
fn poll_once(transport: &mut dyn Transport) -> Result<Option<Verdict>> {
    let n = transport.available()?;
    if n == 0 {
        return Ok(None);
    }

    let buf = transport.read_all()?;
    match framer::classify(&buf) {
        Verdict::Empty => Ok(None),
        verdict => Ok(Some(verdict)),
    }
}
