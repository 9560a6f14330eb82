// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn parse_header(packet: &[u8]) -> (i32, i32, i32, i32) {
    (
        i32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]),
        i32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]),
        i32::from_le_bytes([packet[8], packet[9], packet[10], packet[11]]),
        i32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]),
    )
}

#[test]
fn op_reply_header_and_document() {
    let reply = build_op_reply(7, &json!({"ok": 1.0}));
    let (len, request_id, response_to, opcode) = parse_header(&reply);
    assert_eq!(len as usize, reply.len());
    assert_eq!(request_id, 8);
    assert_eq!(response_to, 7);
    assert_eq!(opcode, OP_REPLY);
    // numberReturned == 1.
    assert_eq!(i32::from_le_bytes([reply[32], reply[33], reply[34], reply[35]]), 1);
    let doc = bson::decode(&reply[36..]);
    assert_eq!(doc["ok"], 1.0);
}

#[test]
fn op_msg_round_trips_body_section() {
    let msg = build_op_msg(3, &json!({"ismaster": true, "ok": 1.0}));
    let (len, _, response_to, opcode) = parse_header(&msg);
    assert_eq!(len as usize, msg.len());
    assert_eq!(response_to, 3);
    assert_eq!(opcode, OP_MSG);
    assert_eq!(msg[20], 0, "section kind 0");
    let doc = bson::decode(&msg[21..]);
    assert_eq!(doc["ismaster"], true);
}

#[test]
fn ismaster_response_shape() {
    let resp = ismaster_response("6.0.12");
    assert_eq!(resp["ismaster"], true);
    assert_eq!(resp["maxWireVersion"], 21);
    assert_eq!(resp["version"], "6.0.12");
}
