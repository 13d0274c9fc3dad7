//! Bind opcode streams from `LC_DYLD_INFO`.

use crate::error::{Error, Result};
use crate::util::{c_bytes_at, read_sleb128_fast, read_uleb128_fast};

/// Bind opcodes used in the dyld bind info.
///
/// These constants define the opcodes used in the compressed binding
/// information format found in LC_DYLD_INFO load commands.
#[allow(missing_docs)] // Constants are self-documenting via names
pub mod bind_opcodes {
    /// Terminates a binding sequence.
    pub const BIND_OPCODE_DONE: u8 = 0x00;
    pub const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
    pub const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
    pub const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
    pub const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
    pub const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
    pub const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
    pub const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
    pub const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
    pub const BIND_OPCODE_DO_BIND: u8 = 0x90;
    pub const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xA0;
    pub const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xB0;
    pub const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xC0;
    pub const BIND_OPCODE_THREADED: u8 = 0xD0;

    pub const BIND_SUBOPCODE_THREADED_SET_BIND_ORDINAL_TABLE_SIZE_ULEB: u8 = 0x00;
    pub const BIND_SUBOPCODE_THREADED_APPLY: u8 = 0x01;

    pub const BIND_IMMEDIATE_MASK: u8 = 0x0F;
    pub const BIND_OPCODE_MASK: u8 = 0xF0;

    pub const BIND_SYMBOL_FLAGS_WEAK_IMPORT: u8 = 0x1;
    pub const BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION: u8 = 0x8;
}

/// A binding record from parsing bind opcodes.
///
/// One record covers `repeat` consecutive bound pointers starting at
/// `segment_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRecord {
    /// Segment index
    pub segment_index: u8,
    /// Offset within segment
    pub segment_offset: u64,
    /// Binding type
    pub bind_type: u8,
    /// Symbol name, or `None` if it is not valid UTF-8
    pub symbol_name: Option<String>,
    /// Trailing flags from the symbol opcode
    pub symbol_flags: u8,
    /// Dylib ordinal; negative values are special lookups
    pub ordinal: i64,
    /// Addend
    pub addend: i64,
    /// Number of pointers bound by this record
    pub repeat: u64,
}

impl BindRecord {
    /// Returns true if the import may be missing at runtime.
    pub fn is_weak_import(&self) -> bool {
        self.symbol_flags & bind_opcodes::BIND_SYMBOL_FLAGS_WEAK_IMPORT != 0
    }
}

#[derive(Default)]
struct BindState {
    segment_index: u8,
    segment_offset: u64,
    bind_type: u8,
    symbol_name: Option<String>,
    symbol_flags: u8,
    ordinal: i64,
    addend: i64,
}

impl BindState {
    fn record(&self, repeat: u64) -> BindRecord {
        BindRecord {
            segment_index: self.segment_index,
            segment_offset: self.segment_offset,
            bind_type: self.bind_type,
            symbol_name: self.symbol_name.clone(),
            symbol_flags: self.symbol_flags,
            ordinal: self.ordinal,
            addend: self.addend,
            repeat,
        }
    }
}

/// Parses bind info opcodes.
///
/// `pointer_size` is the stride between consecutive bound pointers.
pub fn parse_bind_info(data: &[u8], pointer_size: u64) -> Result<Vec<BindRecord>> {
    use bind_opcodes::*;

    let mut records = Vec::new();
    let mut state = BindState::default();
    let mut cursor = 0usize;

    let uleb = |cursor: &mut usize| -> Result<u64> {
        let (value, bytes) = data
            .get(*cursor..)
            .and_then(read_uleb128_fast)
            .ok_or(Error::InvalidUleb128 { offset: *cursor })?;
        *cursor += bytes;
        Ok(value)
    };

    while let Some(&byte) = data.get(cursor) {
        let opcode_offset = cursor;
        let opcode = byte & BIND_OPCODE_MASK;
        let immediate = byte & BIND_IMMEDIATE_MASK;
        cursor += 1;

        match opcode {
            BIND_OPCODE_DONE => break,

            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => {
                state.ordinal = immediate as i64;
            }

            BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                state.ordinal = uleb(&mut cursor)? as i64;
            }

            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                state.ordinal = if immediate == 0 {
                    0
                } else {
                    (BIND_OPCODE_MASK | immediate) as i8 as i64
                };
            }

            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                let name = c_bytes_at(data, cursor).ok_or(Error::InvalidBindOpcode {
                    opcode: byte,
                    offset: opcode_offset,
                })?;
                cursor += name.len() + 1;
                state.symbol_name = std::str::from_utf8(name).ok().map(str::to_string);
                state.symbol_flags = immediate;
            }

            BIND_OPCODE_SET_TYPE_IMM => {
                state.bind_type = immediate;
            }

            BIND_OPCODE_SET_ADDEND_SLEB => {
                let (value, bytes) = data
                    .get(cursor..)
                    .and_then(read_sleb128_fast)
                    .ok_or(Error::InvalidUleb128 { offset: cursor })?;
                cursor += bytes;
                state.addend = value;
            }

            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                state.segment_index = immediate;
                state.segment_offset = uleb(&mut cursor)?;
            }

            BIND_OPCODE_ADD_ADDR_ULEB => {
                state.segment_offset = state.segment_offset.wrapping_add(uleb(&mut cursor)?);
            }

            BIND_OPCODE_DO_BIND => {
                records.push(state.record(1));
                state.segment_offset = state.segment_offset.wrapping_add(pointer_size);
            }

            BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                records.push(state.record(1));
                let skip = uleb(&mut cursor)?;
                state.segment_offset = state
                    .segment_offset
                    .wrapping_add(pointer_size)
                    .wrapping_add(skip);
            }

            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => {
                records.push(state.record(1));
                state.segment_offset = state
                    .segment_offset
                    .wrapping_add(pointer_size)
                    .wrapping_add(immediate as u64 * pointer_size);
            }

            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                let count = uleb(&mut cursor)?;
                let skip = uleb(&mut cursor)?;
                records.push(state.record(count));
                state.segment_offset = state
                    .segment_offset
                    .wrapping_add(count.wrapping_mul(pointer_size.wrapping_add(skip)));
            }

            BIND_OPCODE_THREADED => match immediate {
                BIND_SUBOPCODE_THREADED_SET_BIND_ORDINAL_TABLE_SIZE_ULEB => {
                    uleb(&mut cursor)?;
                }
                // Applying threaded binds walks pointer chains in segment
                // data; the table entries were already emitted by DO_BIND.
                BIND_SUBOPCODE_THREADED_APPLY => {}
                _ => {
                    return Err(Error::InvalidBindOpcode {
                        opcode: byte,
                        offset: opcode_offset,
                    })
                }
            },

            _ => {
                return Err(Error::InvalidBindOpcode {
                    opcode: byte,
                    offset: opcode_offset,
                })
            }
        }
    }

    Ok(records)
}
