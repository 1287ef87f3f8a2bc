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

//! Request encoding and reply classification.
//!
//! The wire protocol carries no length prefix on replies: the only way to
//! tell where a reply ends is the `(INSYNC, status)` trailer. This module
//! is the single place that derives payload length from buffer length, so
//! no call site has to re-derive it.

use crate::constants::{EOC, FAILED, INSYNC, INVALID, OK};

/// Encode a request frame: `opcode ∥ body ∥ EOC`.
pub fn encode(opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + body.len());
    frame.push(opcode);
    frame.extend_from_slice(body);
    frame.push(EOC);
    frame
}

/// The result of classifying a raw reply buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No bytes were received before the deadline.
    Timeout,
    /// Fewer than 2 bytes were received; too short to carry a trailer.
    Empty,
    /// `(INSYNC, OK)` trailer found; `payload` is everything before it.
    Ok(Vec<u8>),
    /// `(INSYNC, INVALID)` trailer found: device didn't recognize the command.
    Invalid,
    /// `(INSYNC, FAILED)` trailer found: device recognized but failed the command.
    Failed,
    /// Final two bytes aren't a recognized trailer at all.
    Malformed,
}

/// Classify a raw buffer per the reply trailer table.
///
/// An empty `buf` (nothing arrived at all) and a non-empty-but-too-short
/// `buf` both classify as [`Verdict::Empty`]; callers map "nothing decisive
/// happened before the deadline" to [`Verdict::Timeout`] themselves, since
/// only the caller knows whether the deadline has actually elapsed.
pub fn classify(buf: &[u8]) -> Verdict {
    if buf.len() < 2 {
        return Verdict::Empty;
    }

    let n = buf.len();
    let (insync, status) = (buf[n - 2], buf[n - 1]);

    if insync != INSYNC {
        return Verdict::Malformed;
    }

    match status {
        OK => Verdict::Ok(buf[..n - 2].to_vec()),
        INVALID => Verdict::Invalid,
        FAILED => Verdict::Failed,
        _ => Verdict::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_always_ends_with_eoc() {
        let frame = encode(0x21, &[]);
        assert_eq!(frame, vec![0x21, EOC]);

        let frame = encode(0x52, &[0x04, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(*frame.last().unwrap(), EOC);
        assert_eq!(frame[0], 0x52);
    }

    #[test]
    fn sync_handshake_classifies_ok_with_empty_payload() {
        let verdict = classify(&[0xA5, 0x10]);
        assert_eq!(verdict, Verdict::Ok(vec![]));
    }

    #[test]
    fn payload_is_everything_before_the_trailer() {
        // FW size decode scenario: fw_size = 131072 (0x00020000), LE.
        let reply = [0x00, 0x00, 0x02, 0x00, 0xA5, 0x10];
        match classify(&reply) {
            Verdict::Ok(payload) => assert_eq!(payload, vec![0x00, 0x00, 0x02, 0x00]),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn invalid_and_failed_trailers() {
        assert_eq!(classify(&[0xA5, 0x13]), Verdict::Invalid);
        assert_eq!(classify(&[0xA5, 0x11]), Verdict::Failed);
    }

    #[test]
    fn short_buffers_are_empty() {
        assert_eq!(classify(&[]), Verdict::Empty);
        assert_eq!(classify(&[0xA5]), Verdict::Empty);
    }

    #[test]
    fn unrecognized_trailer_is_malformed() {
        assert_eq!(classify(&[0x00, 0x00]), Verdict::Malformed);
        assert_eq!(classify(&[0xA5, 0x99]), Verdict::Malformed);
    }

    #[test]
    fn ok_payload_length_equals_total_minus_two() {
        for len in 2..32usize {
            let mut buf = vec![0u8; len];
            buf[len - 2] = INSYNC;
            buf[len - 1] = OK;
            match classify(&buf) {
                Verdict::Ok(payload) => assert_eq!(payload.len(), len - 2),
                other => panic!("expected Ok, got {other:?}"),
            }
        }
    }
}
