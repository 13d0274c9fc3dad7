//! Embedded code signature blobs.
//!
//! The signature superblob is stored big-endian regardless of the image's
//! byte order:
//!
//! ```text
//! superblob: magic u32 | length u32 | count u32 | index[count]
//! index:     type u32  | offset u32            (offset from superblob start)
//! blob:      magic u32 | length u32 | payload[length - 8]
//! ```

use tracing::debug;

use super::constants::*;
use super::header::ThinHeaderView;
use super::structs::LinkeditDataCommand;
use crate::util::{bytes_at_u64, read_u32_be_at};

const SUPERBLOB_HEADER_SIZE: usize = 12;
const BLOB_INDEX_SIZE: usize = 8;
const BLOB_HEADER_SIZE: usize = 8;

/// A blob referenced from the signature superblob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSignatureBlob<'a> {
    /// Slot type (`CSSLOT_*`).
    pub slot: u32,
    /// Blob magic (`CSMAGIC_*`).
    pub magic: u32,
    /// Blob contents after its 8-byte header.
    pub payload: &'a [u8],
}

/// The embedded signature of an image.
#[derive(Debug, Clone, Copy)]
pub struct CodeSignature<'a> {
    data: &'a [u8],
}

impl<'a> CodeSignature<'a> {
    /// Wraps raw superblob bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Returns the raw superblob bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the superblob magic.
    pub fn magic(&self) -> Option<u32> {
        read_u32_be_at(self.data, 0)
    }

    /// Returns the number of index entries the superblob declares.
    pub fn count(&self) -> Option<u32> {
        read_u32_be_at(self.data, 8)
    }

    /// Iterates over the blobs that can be located inside the superblob.
    ///
    /// Entries pointing outside the signature are skipped.
    pub fn blobs(&self) -> impl Iterator<Item = CodeSignatureBlob<'a>> + '_ {
        let count = self.count().unwrap_or(0) as usize;
        let data = self.data;
        (0..count)
            .map_while(move |i| {
                let entry = SUPERBLOB_HEADER_SIZE + i * BLOB_INDEX_SIZE;
                Some((read_u32_be_at(data, entry)?, read_u32_be_at(data, entry + 4)?))
            })
            .filter_map(move |(slot, offset)| blob_at(data, slot, offset as usize))
    }

    /// Returns the first blob in `slot`.
    pub fn blob(&self, slot: u32) -> Option<CodeSignatureBlob<'a>> {
        self.blobs().find(|blob| blob.slot == slot)
    }
}

fn blob_at(data: &[u8], slot: u32, offset: usize) -> Option<CodeSignatureBlob<'_>> {
    let magic = read_u32_be_at(data, offset)?;
    let length = read_u32_be_at(data, offset.checked_add(4)?)? as usize;
    if length < BLOB_HEADER_SIZE {
        return None;
    }
    let payload = data.get(offset + BLOB_HEADER_SIZE..offset.checked_add(length)?)?;
    Some(CodeSignatureBlob {
        slot,
        magic,
        payload,
    })
}

impl<'a> ThinHeaderView<'a> {
    /// Locates the embedded code signature.
    pub fn code_signature(&self) -> Option<CodeSignature<'a>> {
        let command = self
            .lenient_load_commands()
            .find(|c| c.cmd() == LC_CODE_SIGNATURE)?;
        let linkedit: LinkeditDataCommand = command.parse()?;

        let data = bytes_at_u64(self.data(), linkedit.dataoff as u64, linkedit.datasize as u64);
        if data.is_none() {
            debug!(
                "Code signature at {:#x}+{:#x} lies outside the image",
                linkedit.dataoff, linkedit.datasize
            );
        }
        data.map(CodeSignature::new)
    }

    /// Returns the XML entitlements plist, if the image is signed with one.
    pub fn entitlements(&self) -> Option<&'a [u8]> {
        self.signature_payload(CSSLOT_ENTITLEMENTS, CSMAGIC_EMBEDDED_ENTITLEMENTS)
    }

    /// Returns the DER-encoded entitlements, if present.
    pub fn der_entitlements(&self) -> Option<&'a [u8]> {
        self.signature_payload(CSSLOT_DER_ENTITLEMENTS, CSMAGIC_EMBEDDED_DER_ENTITLEMENTS)
    }

    /// Selects the blob by slot tag alone; a blob magic other than `magic`
    /// is logged but still returned.
    fn signature_payload(&self, slot: u32, magic: u32) -> Option<&'a [u8]> {
        let signature = self.code_signature()?;
        let found = signature.blobs().find(|blob| blob.slot == slot);
        let blob = found?;
        if blob.magic != magic {
            debug!(
                "Signature slot {} has blob magic {:#010x}, expected {:#010x}",
                slot, blob.magic, magic
            );
        }
        Some(blob.payload)
    }
}
