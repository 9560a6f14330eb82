// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn command_constants_are_ascii_tags() {
    assert_eq!(ADB_CNXN.to_le_bytes(), *b"CNXN");
    assert_eq!(ADB_AUTH.to_le_bytes(), *b"AUTH");
    assert_eq!(ADB_OPEN.to_le_bytes(), *b"OPEN");
}

#[test]
fn message_frame_round_trip() {
    let frame = build_message(ADB_WRTE, 1, 2, b"hello");
    assert_eq!(frame.len(), 24 + 5);
    let header = parse_header(&frame).unwrap();
    assert_eq!(header.command, ADB_WRTE);
    assert_eq!(header.arg0, 1);
    assert_eq!(header.arg1, 2);
    assert_eq!(header.data_len, 5);
    assert_eq!(&frame[24..], b"hello");
}

#[test]
fn checksum_and_magic_fields() {
    let frame = build_message(ADB_CNXN, 0, 0, &[1, 2, 3]);
    let checksum = u32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]]);
    assert_eq!(checksum, 6);
    let magic = u32::from_le_bytes([frame[20], frame[21], frame[22], frame[23]]);
    assert_eq!(magic, ADB_CNXN ^ 0xFFFF_FFFF);
}

#[test]
fn bad_magic_is_rejected() {
    let mut frame = build_message(ADB_CNXN, 0, 0, &[]);
    frame[20] ^= 0xff;
    assert!(parse_header(&frame).is_none());
    assert!(parse_header(&frame[..10]).is_none());
}
