//! Decoding of the ASIC ID the ROM sends in response to `GET_ID`.
//!
//! The ID is a count byte followed by that many sub-blocks, each laid out as
//! `type, length, 0x01, payload[length - 1]`. The length covers the fixed `0x01` marker.

use crate::error::{Error, Result};
use crate::hex::Hex;
use std::convert::TryInto;
use std::fmt;

/// Model code of the OMAP44xx family, reported as the first two bytes of the ID sub-block.
pub const OMAP44XX_MODEL: [u8; 2] = [0x44, 0x30];

/// Value every sub-block starts with (see table 27-19 of the OMAP4430 TRM).
const RECORD_MARKER: u8 = 0x01;

/// Sub-block types the ROM is known to send.
pub mod record_type {
    pub const ID: u8 = 0x01;
    pub const IDEN: u8 = 0x12;
    pub const UNDOCUMENTED: u8 = 0x13;
    pub const MPKH: u8 = 0x14;
    pub const CRC: u8 = 0x15;
}

/// State of the configuration header (CH) support, which determines the accepted image format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelState {
    Enabled,
    Disabled,
    Unknown(u8),
}

impl From<u8> for ChannelState {
    fn from(flag: u8) -> Self {
        match flag {
            0x07 => ChannelState::Enabled,
            0x17 => ChannelState::Disabled,
            other => ChannelState::Unknown(other),
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Enabled => f.write_str("enabled"),
            ChannelState::Disabled => f.write_str("disabled"),
            ChannelState::Unknown(flag) => write!(f, "unknown (0x{:02x})", flag),
        }
    }
}

/// One decoded sub-block of the ASIC ID.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IdRecord {
    /// Model, CH flag and ROM revision.
    Id {
        model: [u8; 2],
        channel: ChannelState,
        rom_revision: u8,
    },

    Iden([u8; 20]),

    /// A single byte of unknown meaning.
    Undocumented(u8),

    /// Hash of the public key burned into the chip.
    Mpkh([u8; 32]),

    Crc { crc0: [u8; 4], crc1: [u8; 4] },

    /// A sub-block type this library does not know. Kept as-is, as newer ROMs may add fields.
    Unknown { record_type: u8, payload: Vec<u8> },
}

/// A sub-block split off the ID, marker already checked and stripped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawRecord<'a> {
    pub record_type: u8,
    pub payload: &'a [u8],
}

/// Splits the first `n` bytes off a slice, failing if there are fewer.
fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(Error::Framing {
            expected: n,
            actual: input.len(),
        });
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Splits an ASIC ID into its sub-blocks without interpreting them.
pub fn split_records(blob: &[u8]) -> Result<Vec<RawRecord<'_>>> {
    let mut input = blob;
    let count = take(&mut input, 1)?[0];

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let header = take(&mut input, 2)?;
        let (record_type, length) = (header[0], header[1] as usize);

        let body = take(&mut input, length)?;
        let (marker, payload) = body.split_first().ok_or(Error::Framing {
            expected: 1,
            actual: 0,
        })?;
        if *marker != RECORD_MARKER {
            return Err(Error::violation(
                "ASIC ID sub-block marker",
                format_args!("0x{:02x}", RECORD_MARKER),
                format_args!("0x{:02x}", marker),
            ));
        }

        records.push(RawRecord {
            record_type,
            payload,
        });
    }

    if !input.is_empty() {
        return Err(Error::Framing {
            expected: blob.len() - input.len(),
            actual: blob.len(),
        });
    }

    Ok(records)
}

/// Checks the payload length of a known sub-block and converts it into an array.
fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N]> {
    payload.try_into().map_err(|_| Error::Framing {
        expected: N,
        actual: payload.len(),
    })
}

impl IdRecord {
    /// Interprets a raw sub-block.
    pub fn decode(raw: RawRecord<'_>) -> Result<Self> {
        let payload = raw.payload;
        Ok(match raw.record_type {
            record_type::ID => {
                let [m0, m1, flag, rom_revision] = fixed::<4>(payload)?;
                let model = [m0, m1];
                if model != OMAP44XX_MODEL {
                    return Err(Error::violation(
                        "ASIC ID model",
                        Hex(&OMAP44XX_MODEL),
                        Hex(&model),
                    ));
                }
                IdRecord::Id {
                    model,
                    channel: flag.into(),
                    rom_revision,
                }
            }
            record_type::IDEN => IdRecord::Iden(fixed(payload)?),
            record_type::UNDOCUMENTED => IdRecord::Undocumented(fixed::<1>(payload)?[0]),
            record_type::MPKH => IdRecord::Mpkh(fixed(payload)?),
            record_type::CRC => {
                let crcs = fixed::<8>(payload)?;
                IdRecord::Crc {
                    crc0: [crcs[0], crcs[1], crcs[2], crcs[3]],
                    crc1: [crcs[4], crcs[5], crcs[6], crcs[7]],
                }
            }
            record_type => IdRecord::Unknown {
                record_type,
                payload: payload.to_vec(),
            },
        })
    }

    /// The sub-block type this record was decoded from.
    pub fn record_type(&self) -> u8 {
        match self {
            IdRecord::Id { .. } => record_type::ID,
            IdRecord::Iden(_) => record_type::IDEN,
            IdRecord::Undocumented(_) => record_type::UNDOCUMENTED,
            IdRecord::Mpkh(_) => record_type::MPKH,
            IdRecord::Crc { .. } => record_type::CRC,
            IdRecord::Unknown { record_type, .. } => *record_type,
        }
    }
}

impl fmt::Display for IdRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdRecord::Id {
                model,
                channel,
                rom_revision,
            } => {
                writeln!(f, "Model: {}", Hex(model))?;
                writeln!(f, "ROM revision: 0x{:02x}", rom_revision)?;
                write!(f, "CH: {}", channel)
            }
            IdRecord::Iden(iden) => write!(f, "IDEN: {:#}", Hex(iden)),
            IdRecord::Undocumented(value) => write!(f, "Undocumented sub-block: 0x{:02x}", value),
            IdRecord::Mpkh(mpkh) => write!(f, "MPKH: {:#}", Hex(mpkh)),
            IdRecord::Crc { crc0, crc1 } => {
                writeln!(f, "CRC0: {:#}", Hex(crc0))?;
                write!(f, "CRC1: {:#}", Hex(crc1))
            }
            IdRecord::Unknown {
                record_type,
                payload,
            } => write!(f, "Sub-block 0x{:02x}: {:#}", record_type, Hex(payload)),
        }
    }
}

/// The identity a ROM reported, sub-blocks in the order they were received.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AsicId {
    pub records: Vec<IdRecord>,
}

impl AsicId {
    /// Parses a complete ASIC ID.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use omapboot::{AsicId, ChannelState, IdRecord};
    ///
    /// let id = AsicId::parse(&[0x01, 0x01, 0x05, 0x01, 0x44, 0x30, 0x07, 0x05]).unwrap();
    /// assert_eq!(
    ///     id.records,
    ///     vec![IdRecord::Id {
    ///         model: [0x44, 0x30],
    ///         channel: ChannelState::Enabled,
    ///         rom_revision: 0x05,
    ///     }]
    /// );
    /// ```
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let records = split_records(blob)?
            .into_iter()
            .map(IdRecord::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(AsicId { records })
    }

    /// ROM revision from the ID sub-block, if present.
    pub fn rom_revision(&self) -> Option<u8> {
        self.records.iter().find_map(|record| match record {
            IdRecord::Id { rom_revision, .. } => Some(*rom_revision),
            _ => None,
        })
    }

    /// CH state from the ID sub-block, if present.
    pub fn channel(&self) -> Option<ChannelState> {
        self.records.iter().find_map(|record| match record {
            IdRecord::Id { channel, .. } => Some(*channel),
            _ => None,
        })
    }
}

impl fmt::Display for AsicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "{}", record)?;
        }
        Ok(())
    }
}
