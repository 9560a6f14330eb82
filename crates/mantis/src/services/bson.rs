// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal BSON codec for the MongoDB emulator.
//!
//! Covers exactly the types the canned responses need: string, int32,
//! int64, double, bool, null, embedded document, and array. Documents are
//! modeled as `serde_json::Value` objects; integers encode as int32 when
//! they fit, int64 otherwise.

use serde_json::Value;

/// Encode a JSON object as a BSON document. Non-object values encode as an
/// empty document.
pub fn encode(doc: &Value) -> Vec<u8> {
    let mut elements = Vec::new();
    if let Value::Object(map) = doc {
        for (key, value) in map {
            encode_element(&mut elements, key, value);
        }
    }
    finish_document(elements)
}

fn finish_document(elements: Vec<u8>) -> Vec<u8> {
    let total = 4 + elements.len() + 1;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as i32).to_le_bytes());
    out.extend_from_slice(&elements);
    out.push(0);
    out
}

fn encode_element(out: &mut Vec<u8>, key: &str, value: &Value) {
    let mut push_key = |out: &mut Vec<u8>, tag: u8| {
        out.push(tag);
        out.extend_from_slice(key.as_bytes());
        out.push(0);
    };
    match value {
        Value::String(text) => {
            push_key(out, 0x02);
            out.extend_from_slice(&((text.len() + 1) as i32).to_le_bytes());
            out.extend_from_slice(text.as_bytes());
            out.push(0);
        }
        Value::Bool(flag) => {
            push_key(out, 0x08);
            out.push(u8::from(*flag));
        }
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                if i32::try_from(int).is_ok() {
                    push_key(out, 0x10);
                    out.extend_from_slice(&(int as i32).to_le_bytes());
                } else {
                    push_key(out, 0x12);
                    out.extend_from_slice(&int.to_le_bytes());
                }
            } else {
                push_key(out, 0x01);
                out.extend_from_slice(&number.as_f64().unwrap_or(0.0).to_le_bytes());
            }
        }
        Value::Object(_) => {
            push_key(out, 0x03);
            out.extend_from_slice(&encode(value));
        }
        Value::Array(items) => {
            push_key(out, 0x04);
            // Arrays are documents keyed by stringified indices.
            let mut elements = Vec::new();
            for (index, item) in items.iter().enumerate() {
                encode_element(&mut elements, &index.to_string(), item);
            }
            out.extend_from_slice(&finish_document(elements));
        }
        Value::Null => push_key(out, 0x0a),
    }
}

/// Best-effort decode of a BSON document into a JSON object. Unknown
/// element types stop the parse; whatever was read so far is returned.
pub fn decode(data: &[u8]) -> Value {
    let mut map = serde_json::Map::new();
    if data.len() < 5 {
        return Value::Object(map);
    }
    let doc_len = i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let end = doc_len.min(data.len()).saturating_sub(1);
    let mut pos = 4;

    while pos < end {
        let tag = data[pos];
        pos += 1;
        let Some(key_end) = data[pos..end].iter().position(|b| *b == 0) else {
            break;
        };
        let key = String::from_utf8_lossy(&data[pos..pos + key_end]).into_owned();
        pos += key_end + 1;

        match tag {
            0x01 => {
                let Some(bytes) = data.get(pos..pos + 8) else { break };
                let value = f64::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                map.insert(key, serde_json::json!(value));
                pos += 8;
            }
            0x02 => {
                let Some(bytes) = data.get(pos..pos + 4) else { break };
                let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
                pos += 4;
                let Some(text) = data.get(pos..pos + len.saturating_sub(1)) else { break };
                map.insert(key, Value::String(String::from_utf8_lossy(text).into_owned()));
                pos += len;
            }
            0x03 | 0x04 => {
                let Some(bytes) = data.get(pos..pos + 4) else { break };
                let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
                let Some(sub) = data.get(pos..pos + len) else { break };
                map.insert(key, decode(sub));
                pos += len;
            }
            0x08 => {
                let Some(byte) = data.get(pos) else { break };
                map.insert(key, Value::Bool(*byte != 0));
                pos += 1;
            }
            0x0a => {
                map.insert(key, Value::Null);
            }
            0x10 => {
                let Some(bytes) = data.get(pos..pos + 4) else { break };
                let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                map.insert(key, serde_json::json!(value));
                pos += 4;
            }
            0x12 => {
                let Some(bytes) = data.get(pos..pos + 8) else { break };
                let value = i64::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                map.insert(key, serde_json::json!(value));
                pos += 8;
            }
            _ => break,
        }
    }
    Value::Object(map)
}

#[cfg(test)]
#[path = "bson_tests.rs"]
mod tests;
