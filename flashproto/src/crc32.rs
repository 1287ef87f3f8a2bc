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

//! Reflected CRC-32 (polynomial `0xEDB88320`), computed identically to the
//! device's own checksum so a programmed image can be verified byte-for-byte.
//!
//! Unlike the IEEE 802.3 Ethernet CRC, there is no initial complement and no
//! final XOR: the raw running state is the value exchanged on the wire.

const POLY: u32 = 0xEDB8_8320;

fn table() -> &'static [u32; 256] {
    static TABLE: std::sync::OnceLock<[u32; 256]> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    })
}

/// Fold `bytes` into `state`, returning the new running CRC state.
///
/// Calling this repeatedly over consecutive slices of a buffer yields the
/// same result as a single call over their concatenation, so chunked
/// firmware transfers can be verified incrementally.
pub fn update(state: u32, bytes: &[u8]) -> u32 {
    let table = table();
    bytes.iter().fold(state, |state, &byte| {
        table[((state ^ u32::from(byte)) & 0xff) as usize] ^ (state >> 8)
    })
}

/// Compute the CRC32 of `bytes` from the initial state `0`.
pub fn compute(bytes: &[u8]) -> u32 {
    update(0, bytes)
}

/// Compute the CRC32 of `image` as if it were padded with `0xFF` fill bytes
/// up to `total_len`, without materializing the padding.
///
/// This models the device's view of the firmware region: unwritten flash
/// reads back as `0xFF`, so the checksum must cover the image followed by
/// enough fill bytes to reach the full region size.
pub fn compute_with_fill(image: &[u8], total_len: usize) -> u32 {
    let state = compute(image);
    let fill = total_len.saturating_sub(image.len());
    const FILL_CHUNK: [u8; 64] = [0xFF; 64];
    let mut state = state;
    let mut remaining = fill;
    while remaining > 0 {
        let n = remaining.min(FILL_CHUNK.len());
        state = update(state, &FILL_CHUNK[..n]);
        remaining -= n;
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_identity() {
        assert_eq!(compute(&[]), 0);
    }

    #[test]
    fn known_vector() {
        // CRC-32/JAMCRC of "123456789" is 0xCBF43926.
        assert_eq!(compute(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn chaining_is_associative() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let whole = compute(data);

        for split in 0..=data.len() {
            let (a, b) = data.split_at(split);
            let chained = update(update(0, a), b);
            assert_eq!(chained, whole, "split at {split} diverged");
        }
    }

    #[test]
    fn fill_matches_materialized_padding() {
        let image = [0x01, 0x02, 0x03, 0x04];
        let mut padded = image.to_vec();
        padded.extend(std::iter::repeat(0xFFu8).take(12));

        assert_eq!(compute_with_fill(&image, 16), compute(&padded));
    }

    #[test]
    fn fill_no_op_when_image_fills_region() {
        let image = [0xAAu8; 32];
        assert_eq!(compute_with_fill(&image, 32), compute(&image));
    }
}
