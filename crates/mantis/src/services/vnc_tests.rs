// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn server_init_geometry_and_name() {
    let init = build_server_init("prod-workstation:0");
    assert_eq!(u16::from_be_bytes([init[0], init[1]]), 1024);
    assert_eq!(u16::from_be_bytes([init[2], init[3]]), 768);
    // Pixel format: 32 bpp true-colour.
    assert_eq!(init[4], 32);
    assert_eq!(init[5], 24);
    assert_eq!(init[7], 1);
    // Name length + name trail the fixed 24-byte prefix.
    let name_len = u32::from_be_bytes([init[20], init[21], init[22], init[23]]) as usize;
    assert_eq!(name_len, "prod-workstation:0".len());
    assert_eq!(&init[24..], b"prod-workstation:0");
}
