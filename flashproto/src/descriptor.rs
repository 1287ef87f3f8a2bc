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

//! Parses the device's ASCII flash-structure descriptor into a table of
//! [`FlashSector`]s.
//!
//! Grammar:
//!
//! ```text
//! descriptor := region+
//! region     := '@' label '/' hex_addr '/' sector_spec (',' sector_spec)*
//! sector_spec:= count '*' size_kb code
//! code       := one character in {a,b,c,d,e,f,g}
//! ```
//!
//! Example: `@Internal Flash/0x08000000/04*016Kg,01*064Kg,07*128Kg`.

use crate::error::Error;

/// One physical, independently addressable sector of flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSector {
    /// 0-based ordinal across the whole descriptor.
    pub index: u32,
    pub start_addr: u32,
    pub end_addr: u32,
    pub size_kb: u32,
    pub readable: bool,
    pub writable: bool,
    pub erasable: bool,
}

/// Permission bits for an unrecognized sector code: a warning, not an error.
fn permissions(code: char) -> Option<(bool, bool, bool)> {
    // (readable, writable, erasable)
    match code {
        'a' => Some((true, false, false)),
        'b' => Some((false, false, true)),
        'c' => Some((true, false, true)),
        'd' => Some((false, true, false)),
        'e' => Some((true, true, false)),
        'f' => Some((false, true, true)),
        'g' => Some((true, true, true)),
        _ => None,
    }
}

/// Parse a flash-structure descriptor string into its sector table.
///
/// On success, also returns warnings for any sector codes that weren't
/// recognized (those sectors are emitted with every permission bit false).
/// A malformed region returns [`Error::DescriptorMalformed`] identifying the
/// byte offset of the region that failed; no partial table is returned, since
/// a partially-trusted sector map is worse than none for an operation that
/// can erase flash.
pub fn parse(text: &str) -> Result<(Vec<FlashSector>, Vec<String>), Error> {
    let mut sectors = Vec::new();
    let mut warnings = Vec::new();
    let mut index: u32 = 0;

    // Each region starts at a literal '@'; `offset` tracks the byte position
    // of the '@' that opened the region currently being parsed.
    let mut rest = text;
    let mut base_offset = 0usize;

    while !rest.is_empty() {
        let at_pos = match rest.find('@') {
            Some(p) => p,
            None => break,
        };
        let region_offset = base_offset + at_pos;
        rest = &rest[at_pos + 1..];
        base_offset = region_offset + 1;

        // A region ends just before the next '@', or at the end of input.
        let region_end = rest.find('@').unwrap_or(rest.len());
        let region = &rest[..region_end];

        parse_region(region, region_offset, &mut index, &mut sectors, &mut warnings)?;

        rest = &rest[region_end..];
        base_offset += region_end;
    }

    Ok((sectors, warnings))
}

fn parse_region(
    region: &str,
    region_offset: usize,
    index: &mut u32,
    sectors: &mut Vec<FlashSector>,
    warnings: &mut Vec<String>,
) -> Result<(), Error> {
    let malformed = || Error::DescriptorMalformed {
        offset: region_offset,
    };

    // region := label '/' hex_addr '/' sector_spec (',' sector_spec)*
    let mut parts = region.splitn(3, '/');
    let _label = parts.next().ok_or_else(malformed)?;
    let hex_addr = parts.next().ok_or_else(malformed)?;
    let sector_specs = parts.next().ok_or_else(malformed)?;

    let hex_addr = hex_addr.trim().strip_prefix("0x").unwrap_or(hex_addr.trim());
    let mut addr = u32::from_str_radix(hex_addr, 16).map_err(|_| malformed())?;

    for spec in sector_specs.split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }

        let (count_str, rest) = spec.split_once('*').ok_or_else(malformed)?;
        let count: u32 = count_str.trim().parse().map_err(|_| malformed())?;

        if rest.is_empty() {
            return Err(malformed());
        }
        let code = rest.chars().last().ok_or_else(malformed)?;
        let size_str = &rest[..rest.len() - code.len_utf8()];
        // The size field is terminated by a literal 'K' (kilobytes).
        let size_str = size_str.strip_suffix(['K', 'k']).ok_or_else(malformed)?;
        let size_kb: u32 = size_str.trim().parse().map_err(|_| malformed())?;

        let (readable, writable, erasable) = match permissions(code) {
            Some(perms) => perms,
            None => {
                warnings.push(format!(
                    "unrecognized sector code `{code}` at offset {region_offset}; treating as no access"
                ));
                (false, false, false)
            }
        };

        for _ in 0..count {
            let start_addr = addr;
            let end_addr = start_addr + size_kb * 1024;

            sectors.push(FlashSector {
                index: *index,
                start_addr,
                end_addr,
                size_kb,
                readable,
                writable,
                erasable,
            });

            *index += 1;
            addr = end_addr;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_example() {
        let (sectors, warnings) = parse(
            "@Internal/0x08000000/02*016Kg,01*064Kg",
        )
        .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(
            sectors,
            vec![
                FlashSector {
                    index: 0,
                    start_addr: 0x0800_0000,
                    end_addr: 0x0800_4000,
                    size_kb: 16,
                    readable: true,
                    writable: true,
                    erasable: true,
                },
                FlashSector {
                    index: 1,
                    start_addr: 0x0800_4000,
                    end_addr: 0x0800_8000,
                    size_kb: 16,
                    readable: true,
                    writable: true,
                    erasable: true,
                },
                FlashSector {
                    index: 2,
                    start_addr: 0x0800_8000,
                    end_addr: 0x0801_8000,
                    size_kb: 64,
                    readable: true,
                    writable: true,
                    erasable: true,
                },
            ]
        );
    }

    #[test]
    fn index_is_monotonic_across_regions() {
        let (sectors, _) = parse(
            "@Bank A/0x08000000/01*016Ka@Bank B/0x08100000/01*016Kb",
        )
        .unwrap();

        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].index, 0);
        assert_eq!(sectors[1].index, 1);
        assert_eq!(sectors[0].start_addr, 0x0800_0000);
        assert_eq!(sectors[1].start_addr, 0x0810_0000);
    }

    #[test]
    fn permission_codes_map_to_the_authoritative_table() {
        assert_eq!(permissions('a'), Some((true, false, false)));
        assert_eq!(permissions('b'), Some((false, false, true)));
        assert_eq!(permissions('c'), Some((true, false, true)));
        assert_eq!(permissions('d'), Some((false, true, false)));
        assert_eq!(permissions('e'), Some((true, true, false)));
        assert_eq!(permissions('f'), Some((false, true, true)));
        assert_eq!(permissions('g'), Some((true, true, true)));
    }

    #[test]
    fn unknown_code_warns_instead_of_erroring() {
        let (sectors, warnings) = parse("@X/0x0/01*016Kz").unwrap();
        assert_eq!(sectors.len(), 1);
        assert!(!sectors[0].readable && !sectors[0].writable && !sectors[0].erasable);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn malformed_region_reports_offset_and_no_partial_table() {
        let err = parse("@Bad-Region-No-Slashes").unwrap_err();
        assert!(matches!(err, Error::DescriptorMalformed { offset: 0 }));
    }

    #[test]
    fn malformed_second_region_discards_first_region_too() {
        let err = parse("@Good/0x0/01*016Ka@Bad").unwrap_err();
        match err {
            Error::DescriptorMalformed { offset } => assert!(offset > 0),
            other => panic!("expected DescriptorMalformed, got {other:?}"),
        }
    }
}
