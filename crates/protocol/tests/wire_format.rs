//! Cross-module wire-format properties

use protocol::cdc::{self, CdcHeader, encode_header, encode_windowed_frame};
use protocol::integrity::{CrcVariant, resolve_crc32};
use protocol::stat::{STAT_LEN, STAT_PREFIX, StatusBlock};
use protocol::vendor::{self, FLAG_CH0, FLAG_CRC, FLAG_TEST, FrameClass, VendorHeader};
use protocol::{SampleMatrix, Window};

/// Resolution is independent of the physical field order whenever exactly
/// one of the two candidates passes the table-bytes plausibility predicate.
#[test]
fn test_header_resolution_order_invariant() {
    // (total, table) pairs where only `table` is plausible as a table size
    let cases = [(511u16, 0u16), (513, 4), (1023, 64), (32767, 4096), (999, 12)];
    for (total, table) in cases {
        let primary = CdcHeader::parse(&encode_header(1, total, 0, 1, 0, 2, table));
        let swapped = CdcHeader::parse(&encode_header(1, table, 0, 1, 0, 2, total));
        assert_eq!(primary.total_samples, total, "case ({total},{table})");
        assert_eq!(primary.table_bytes, table, "case ({total},{table})");
        assert_eq!(swapped.total_samples, total, "swapped ({total},{table})");
        assert_eq!(swapped.table_bytes, table, "swapped ({total},{table})");
        assert!(!primary.ambiguous_layout);
        assert!(!swapped.ambiguous_layout);
    }
}

#[test]
fn test_both_plausible_is_flagged_not_rejected() {
    let header = CdcHeader::parse(&encode_header(1, 128, 0, 1, 0, 2, 8));
    assert!(header.ambiguous_layout);
    // primary orientation wins on the tie
    assert_eq!(header.total_samples, 128);
    assert_eq!(header.table_bytes, 8);
}

#[test]
fn test_encoded_frame_resolves_to_incl_tbl() {
    let samples: Vec<i16> = (0..12).collect();
    let wire = encode_windowed_frame(1, 2, &[Window::new(0, 6)], &samples, CrcVariant::InclTable);

    let header = &wire[2..18];
    let table = &wire[18..22];
    let payload = &wire[22..wire.len() - 4];
    let trailer: [u8; 4] = wire[wire.len() - 4..].try_into().unwrap();

    let variant = resolve_crc32(
        &CrcVariant::WITH_TABLE,
        &cdc::MAGIC,
        header,
        table,
        payload,
        trailer,
    );
    assert_eq!(variant, Some(CrcVariant::InclTable));
    assert_eq!(variant.unwrap().name(), "incl+tbl");

    let matrix = SampleMatrix::from_le_bytes(payload, 2);
    assert_eq!(matrix.as_slice(), samples.as_slice());
}

#[test]
fn test_candidate_order_prefers_table_bodies() {
    // With an empty table, the incl body equals the incl+tbl body; the
    // candidate list without a table must not report a "+tbl" name.
    let header = [7u8; 16];
    let payload = [1u8, 2, 3, 4];
    let crc = CrcVariant::Incl.compute(&cdc::MAGIC, &header, &[], &payload);
    let variant = resolve_crc32(
        &CrcVariant::WITHOUT_TABLE,
        &cdc::MAGIC,
        &header,
        &[],
        &payload,
        crc.to_le_bytes(),
    );
    assert_eq!(variant, Some(CrcVariant::Incl));
}

#[test]
fn test_vendor_roundtrip_and_soft_crc() {
    let wire = vendor::encode_frame(100, 555, FLAG_CH0 | FLAG_CRC, Window::new(0, 3), &[-1, 0, 1]);
    let header = VendorHeader::parse(&wire).unwrap();
    assert_eq!(header.seq, 100);
    assert_eq!(header.class(), FrameClass::Channel(0));
    assert!(vendor::verify_crc16(
        &wire[..vendor::HEADER_LEN],
        &wire[vendor::HEADER_LEN..]
    ));

    // flip one payload bit: header still parses, only the CRC fails
    let mut corrupted = wire.clone();
    corrupted[vendor::HEADER_LEN] ^= 0x01;
    assert!(VendorHeader::parse(&corrupted).is_ok());
    assert!(!vendor::verify_crc16(
        &corrupted[..vendor::HEADER_LEN],
        &corrupted[vendor::HEADER_LEN..]
    ));
}

#[test]
fn test_vendor_heartbeat_classification() {
    let wire = vendor::encode_frame(1, 0, FLAG_TEST, Window::new(0, 2), &[0, 0]);
    let header = VendorHeader::parse(&wire).unwrap();
    assert_eq!(header.class(), FrameClass::Test);
}

#[test]
fn test_stat_documented_offsets() {
    let mut raw = [0u8; STAT_LEN];
    raw[..4].copy_from_slice(STAT_PREFIX);
    raw[4] = 1;
    raw[6..8].copy_from_slice(&512u16.to_le_bytes());
    raw[8..10].copy_from_slice(&1024u16.to_le_bytes());

    let stat = StatusBlock::parse(&raw).unwrap();
    assert_eq!(stat.cur_samples, 512);
    assert_eq!(stat.frame_bytes, 1024);
    assert_eq!(stat.readiness(), (false, false));
    assert_eq!(&stat.raw[..], &raw[..]);
}
