//! Tests for the varint reference encoding.

use super::varint::{MAX_VALUE, VarintError, prefix_for, read_varint, write_varint};

fn round_trip(value: u64) -> (u64, usize) {
    let mut buf = Vec::new();
    write_varint(value, &mut buf).unwrap();
    let len = buf.len();
    let mut input = buf.as_slice();
    let decoded = read_varint(&mut input).unwrap();
    assert!(input.is_empty(), "decoder must consume the whole encoding");
    (decoded, len)
}

#[test]
fn range_law() {
    assert_eq!(prefix_for(0).unwrap(), 0);
    assert_eq!(prefix_for(0x3f).unwrap(), 0);
    assert_eq!(prefix_for(0x40).unwrap(), 1);
    assert_eq!(prefix_for(0x3fff).unwrap(), 1);
    assert_eq!(prefix_for(0x4000).unwrap(), 2);
    assert_eq!(prefix_for(0x3fff_ffff).unwrap(), 2);
    assert_eq!(prefix_for(0x4000_0000).unwrap(), 3);
    assert_eq!(prefix_for(MAX_VALUE).unwrap(), 3);
}

#[test]
fn rejects_values_above_range() {
    assert_eq!(
        prefix_for(0x4000_0000_0000_0000),
        Err(VarintError::OutOfRange(0x4000_0000_0000_0000))
    );
    let mut buf = Vec::new();
    assert!(write_varint(u64::MAX, &mut buf).is_err());
    assert!(buf.is_empty());
}

#[test]
fn round_trips_at_boundaries() {
    for value in [
        0,
        1,
        0x3f,
        0x40,
        0x3fff,
        0x4000,
        0x3fff_ffff,
        0x4000_0000,
        MAX_VALUE,
    ] {
        let (decoded, _) = round_trip(value);
        assert_eq!(decoded, value);
    }
}

#[test]
fn widths_match_prefix() {
    assert_eq!(round_trip(0x3f).1, 1);
    assert_eq!(round_trip(0x40).1, 2);
    assert_eq!(round_trip(0x4000).1, 4);
    assert_eq!(round_trip(0x4000_0000).1, 8);
}

#[test]
fn eof_mid_value() {
    let mut buf = Vec::new();
    write_varint(0x4000, &mut buf).unwrap();
    let mut input = &buf[..2];
    assert_eq!(read_varint(&mut input), Err(VarintError::UnexpectedEof));

    let mut empty: &[u8] = &[];
    assert_eq!(read_varint(&mut empty), Err(VarintError::UnexpectedEof));
}

#[test]
fn sequential_reads_advance_input() {
    let mut buf = Vec::new();
    write_varint(7, &mut buf).unwrap();
    write_varint(0x1234, &mut buf).unwrap();
    write_varint(0x40, &mut buf).unwrap();

    let mut input = buf.as_slice();
    assert_eq!(read_varint(&mut input).unwrap(), 7);
    assert_eq!(read_varint(&mut input).unwrap(), 0x1234);
    assert_eq!(read_varint(&mut input).unwrap(), 0x40);
    assert!(input.is_empty());
}
