//! CRC resolution for both stream formats
//!
//! The CDC framing went through several firmware revisions that disagreed on
//! what the CRC32 trailer covers (leading magic in or out, window table in or
//! out) and on the init/xor-out convention. Instead of a protocol-version
//! flag, the decoder evaluates an ordered list of named [`CrcVariant`]
//! candidates and accepts the first one that matches either byte order of
//! the trailer.
//!
//! The vendor-bulk header uses a single fixed convention:
//! CRC16-CCITT(FALSE) over header-minus-trailer plus payload.

use crc::{CRC_16_IBM_3740, Crc};
use crc32fast::Hasher;

/// CRC16-CCITT(FALSE), aka CRC-16/IBM-3740 (init 0xFFFF, poly 0x1021)
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute CRC16-CCITT(FALSE) over a list of byte slices
pub fn crc16_ccitt_false(parts: &[&[u8]]) -> u16 {
    let mut digest = CRC16.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

/// One candidate CRC32 convention for the CDC trailer
///
/// Names combine the body start (`incl` = leading magic included, `excl` =
/// header-first, `payload`/`tbl+payload` = header skipped entirely), an
/// optional `+tbl` marker when the window table is part of the body, and a
/// `-ff` marker for the IEEE-negated init/xor-out convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcVariant {
    InclTable,
    InclTableNeg,
    ExclTable,
    ExclTableNeg,
    Incl,
    InclNeg,
    Excl,
    ExclNeg,
    Payload,
    PayloadNeg,
    TablePayload,
    TablePayloadNeg,
}

impl CrcVariant {
    /// Candidate order when the frame carries a window table (or prelude)
    pub const WITH_TABLE: [CrcVariant; 12] = [
        CrcVariant::InclTable,
        CrcVariant::InclTableNeg,
        CrcVariant::ExclTable,
        CrcVariant::ExclTableNeg,
        CrcVariant::Incl,
        CrcVariant::InclNeg,
        CrcVariant::Excl,
        CrcVariant::ExclNeg,
        CrcVariant::Payload,
        CrcVariant::PayloadNeg,
        CrcVariant::TablePayload,
        CrcVariant::TablePayloadNeg,
    ];

    /// Candidate order for table-less frames
    pub const WITHOUT_TABLE: [CrcVariant; 8] = [
        CrcVariant::Incl,
        CrcVariant::InclNeg,
        CrcVariant::Excl,
        CrcVariant::ExclNeg,
        CrcVariant::Payload,
        CrcVariant::PayloadNeg,
        CrcVariant::TablePayload,
        CrcVariant::TablePayloadNeg,
    ];

    /// Table-inclusive bodies only, used by the fallback payload scan on the
    /// windowed path where the table is known to be covered
    pub const TABLE_BODIES: [CrcVariant; 4] = [
        CrcVariant::InclTable,
        CrcVariant::InclTableNeg,
        CrcVariant::ExclTable,
        CrcVariant::ExclTableNeg,
    ];

    /// Candidate list for a frame, depending on whether it carries a table
    pub fn candidates(has_table: bool) -> &'static [CrcVariant] {
        if has_table {
            &Self::WITH_TABLE
        } else {
            &Self::WITHOUT_TABLE
        }
    }

    /// Stable name used in diagnostics and exposed on decoded frames
    pub fn name(&self) -> &'static str {
        match self {
            CrcVariant::InclTable => "incl+tbl",
            CrcVariant::InclTableNeg => "incl-ff+tbl",
            CrcVariant::ExclTable => "excl+tbl",
            CrcVariant::ExclTableNeg => "excl-ff+tbl",
            CrcVariant::Incl => "incl",
            CrcVariant::InclNeg => "incl-ff",
            CrcVariant::Excl => "excl",
            CrcVariant::ExclNeg => "excl-ff",
            CrcVariant::Payload => "payload",
            CrcVariant::PayloadNeg => "payload-ff",
            CrcVariant::TablePayload => "tbl+payload",
            CrcVariant::TablePayloadNeg => "tbl+payload-ff",
        }
    }

    fn negated(&self) -> bool {
        matches!(
            self,
            CrcVariant::InclTableNeg
                | CrcVariant::ExclTableNeg
                | CrcVariant::InclNeg
                | CrcVariant::ExclNeg
                | CrcVariant::PayloadNeg
                | CrcVariant::TablePayloadNeg
        )
    }

    /// Body parts for this variant; empty slices stand in for skipped parts
    fn body<'a>(
        &self,
        magic: &'a [u8],
        header: &'a [u8],
        table: &'a [u8],
        payload: &'a [u8],
    ) -> [&'a [u8]; 4] {
        match self {
            CrcVariant::InclTable | CrcVariant::InclTableNeg => [magic, header, table, payload],
            CrcVariant::ExclTable | CrcVariant::ExclTableNeg => [&[], header, table, payload],
            CrcVariant::Incl | CrcVariant::InclNeg => [magic, header, &[], payload],
            CrcVariant::Excl | CrcVariant::ExclNeg => [&[], header, &[], payload],
            CrcVariant::Payload | CrcVariant::PayloadNeg => [&[], &[], &[], payload],
            CrcVariant::TablePayload | CrcVariant::TablePayloadNeg => [&[], &[], table, payload],
        }
    }

    /// Compute this variant's CRC32 over the given frame parts
    pub fn compute(&self, magic: &[u8], header: &[u8], table: &[u8], payload: &[u8]) -> u32 {
        let init = if self.negated() { 0xFFFF_FFFF } else { 0 };
        let mut hasher = Hasher::new_with_initial(init);
        for part in self.body(magic, header, table, payload) {
            hasher.update(part);
        }
        let crc = hasher.finalize();
        if self.negated() { crc ^ 0xFFFF_FFFF } else { crc }
    }
}

/// Match a 4-byte trailer against a candidate list
///
/// The trailer is accepted in either byte order; firmware revisions have
/// emitted both. Returns the first matching variant.
pub fn resolve_crc32(
    candidates: &[CrcVariant],
    magic: &[u8],
    header: &[u8],
    table: &[u8],
    payload: &[u8],
    trailer: [u8; 4],
) -> Option<CrcVariant> {
    let le = u32::from_le_bytes(trailer);
    let be = u32::from_be_bytes(trailer);
    candidates
        .iter()
        .copied()
        .find(|v| {
            let crc = v.compute(magic, header, table, payload);
            crc == le || crc == be
        })
}

/// Render every candidate's computed value, for the diagnostic error path
pub fn candidate_report(
    candidates: &[CrcVariant],
    magic: &[u8],
    header: &[u8],
    table: &[u8],
    payload: &[u8],
) -> String {
    candidates
        .iter()
        .map(|v| format!("{}={:08x}", v.name(), v.compute(magic, header, table, payload)))
        .collect::<Vec<_>>()
        .join("/")
}
