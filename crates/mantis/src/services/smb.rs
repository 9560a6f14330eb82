// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SMB emulator: NetBIOS-framed SMB1→SMB2 negotiate upgrade, then an
//! NTLMSSP session-setup exchange that captures domain, username,
//! workstation, and the LM/NT challenge responses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

const SMB1_MAGIC: &[u8; 4] = b"\xffSMB";
const SMB2_MAGIC: &[u8; 4] = b"\xfeSMB";

const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const NTLMSSP_NEGOTIATE: u32 = 1;
const NTLMSSP_AUTH: u32 = 3;

const STATUS_SUCCESS: u32 = 0;
const STATUS_MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;

const HEADER_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_TIMEOUT: Duration = Duration::from_secs(10);

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Prefix a packet with its 4-byte big-endian NetBIOS session header.
fn netbios_frame(packet: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + packet.len());
    out.extend_from_slice(&(packet.len() as u32).to_be_bytes());
    out.extend_from_slice(packet);
    out
}

/// SMB2 Negotiate Response advertising dialect 3.1.1 with a random server
/// GUID.
pub fn build_negotiate_response() -> Vec<u8> {
    let mut header = [0u8; 64];
    header[0..4].copy_from_slice(SMB2_MAGIC);
    put_u16(&mut header, 4, 64); // StructureSize
    put_u32(&mut header, 8, STATUS_SUCCESS);
    put_u16(&mut header, 12, 0); // Command: NEGOTIATE
    put_u16(&mut header, 14, 1); // CreditResponse

    let mut body = [0u8; 65];
    put_u16(&mut body, 0, 65); // StructureSize
    put_u16(&mut body, 2, 0); // SecurityMode
    put_u16(&mut body, 4, 0x0311); // DialectRevision: SMB 3.1.1
    rand::rng().fill_bytes(&mut body[8..24]); // ServerGuid
    put_u32(&mut body, 24, 0x2F); // Capabilities
    put_u32(&mut body, 28, 65536); // MaxTransactSize
    put_u32(&mut body, 32, 65536); // MaxReadSize
    put_u32(&mut body, 36, 65536); // MaxWriteSize
    put_u16(&mut body, 56, 128); // SecurityBufferOffset
    put_u16(&mut body, 58, 0); // SecurityBufferLength

    let mut packet = Vec::with_capacity(64 + 65);
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&body);
    netbios_frame(&packet)
}

/// NTLMSSP Type 2 (Challenge) with a random 8-byte server challenge and
/// target name "WORKGROUP".
pub fn build_ntlm_challenge() -> Vec<u8> {
    let mut challenge = [0u8; 8];
    rand::rng().fill_bytes(&mut challenge);

    let target_name: Vec<u8> =
        "WORKGROUP".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let target_offset: u32 = 56;

    let mut msg = Vec::new();
    msg.extend_from_slice(NTLMSSP_SIGNATURE);
    msg.extend_from_slice(&2u32.to_le_bytes()); // MessageType: CHALLENGE
    msg.extend_from_slice(&(target_name.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(target_name.len() as u16).to_le_bytes());
    msg.extend_from_slice(&target_offset.to_le_bytes());
    msg.extend_from_slice(&0x0002_8233u32.to_le_bytes()); // NegotiateFlags
    msg.extend_from_slice(&challenge);
    msg.extend_from_slice(&[0u8; 8]); // Reserved
    msg.extend_from_slice(&[0u8; 8]); // TargetInfo fields (empty)
    while msg.len() < target_offset as usize {
        msg.push(0);
    }
    msg.extend_from_slice(&target_name);
    msg
}

/// Minimal DER length encoding.
fn asn1_len(length: usize) -> Vec<u8> {
    if length < 0x80 {
        vec![length as u8]
    } else if length < 0x100 {
        vec![0x81, length as u8]
    } else {
        let mut out = vec![0x82];
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out
    }
}

/// Fixed-shape SPNEGO negTokenTarg wrapper around an NTLMSSP token. A full
/// ASN.1 library is overkill for this one shape.
pub fn wrap_spnego(ntlmssp: &[u8]) -> Vec<u8> {
    let mut inner = vec![0x04];
    inner.extend_from_slice(&asn1_len(ntlmssp.len()));
    inner.extend_from_slice(ntlmssp);

    let mut seq = vec![0xa0];
    seq.extend_from_slice(&asn1_len(inner.len()));
    seq.extend_from_slice(&inner);

    let mut resp = vec![0xa1];
    resp.extend_from_slice(&asn1_len(seq.len() + 3));
    resp.push(0x30);
    resp.extend_from_slice(&asn1_len(seq.len() + 1));
    resp.push(0xa0);
    resp.extend_from_slice(&asn1_len(0));
    resp.extend_from_slice(&seq);
    resp
}

/// SMB2 Session Setup Response carrying an SPNEGO-wrapped NTLMSSP token.
pub fn build_session_setup_response(ntlmssp: &[u8], session_id: u64, status: u32) -> Vec<u8> {
    let spnego = if ntlmssp.is_empty() { Vec::new() } else { wrap_spnego(ntlmssp) };

    let mut header = [0u8; 64];
    header[0..4].copy_from_slice(SMB2_MAGIC);
    put_u16(&mut header, 4, 64);
    put_u32(&mut header, 8, status);
    put_u16(&mut header, 12, 1); // Command: SESSION_SETUP
    put_u16(&mut header, 14, 1); // CreditResponse
    put_u32(&mut header, 16, 1); // Flags: SMB2_FLAGS_SERVER_TO_REDIR
    put_u64(&mut header, 40, session_id);

    let mut body = [0u8; 8];
    put_u16(&mut body, 0, 9); // StructureSize
    put_u16(&mut body, 2, 0); // SessionFlags
    put_u16(&mut body, 4, 64 + 8); // SecurityBufferOffset
    put_u16(&mut body, 6, spnego.len() as u16);

    let mut packet = Vec::with_capacity(64 + 8 + spnego.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&body);
    packet.extend_from_slice(&spnego);
    netbios_frame(&packet)
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*data.get(offset)?, *data.get(offset + 1)?]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *data.get(offset)?,
        *data.get(offset + 1)?,
        *data.get(offset + 2)?,
        *data.get(offset + 3)?,
    ]))
}

/// Parse an NTLMSSP Type 3 (Authenticate) message out of a session-setup
/// packet: domain, username, workstation, and the LM/NT response bytes.
pub fn parse_ntlm_auth(packet: &[u8]) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    let Some(base) = packet.windows(8).position(|w| w == NTLMSSP_SIGNATURE) else {
        return serde_json::Value::Object(out);
    };
    let Some(msg_type) = read_u32(packet, base + 8) else {
        return serde_json::Value::Object(out);
    };
    if msg_type != NTLMSSP_AUTH {
        return serde_json::Value::Object(out);
    }

    // Security-buffer field: length(2) + maxlen(2) + offset(4).
    let read_field = |field_offset: usize| -> Vec<u8> {
        let Some(length) = read_u16(packet, base + field_offset) else {
            return Vec::new();
        };
        let Some(buf_offset) = read_u32(packet, base + field_offset + 4) else {
            return Vec::new();
        };
        let start = base + buf_offset as usize;
        let end = start + length as usize;
        if length > 0 && end <= packet.len() {
            packet[start..end].to_vec()
        } else {
            Vec::new()
        }
    };

    let decode_utf16 = |bytes: &[u8]| -> String {
        let units: Vec<u16> =
            bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        String::from_utf16_lossy(&units)
    };

    let lm_response = read_field(12);
    let nt_response = read_field(20);
    let domain = read_field(28);
    let user = read_field(36);
    let workstation = read_field(44);

    out.insert("domain".to_owned(), decode_utf16(&domain).into());
    out.insert("username".to_owned(), decode_utf16(&user).into());
    out.insert("workstation".to_owned(), decode_utf16(&workstation).into());
    out.insert("nt_response_len".to_owned(), nt_response.len().into());
    out.insert("lm_response_len".to_owned(), lm_response.len().into());
    if !nt_response.is_empty() {
        out.insert("nt_hash".to_owned(), hex_encode(&nt_response).into());
    }
    if !lm_response.is_empty() {
        out.insert("lm_hash".to_owned(), hex_encode(&lm_response).into());
    }
    serde_json::Value::Object(out)
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub async fn start(
    ctx: Arc<ServiceContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<ServiceHandle> {
    let cancel = shutdown.child_token();
    let mut handle = ServiceHandle::new(ctx.service, cancel.clone());
    let (addr, task) = spawn_listener(ctx.clone(), ctx.config.port, cancel, handle_client).await?;
    handle.push(addr, task);
    Ok(handle)
}

async fn handle_client(
    ctx: Arc<ServiceContext>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let mut session = ctx.create_session(&peer.ip().to_string(), peer.port(), serde_json::json!({}));
    let result = dialogue(&ctx, &mut stream, &mut session).await;
    ctx.end_session(&mut session);
    result
}

async fn dialogue(
    ctx: &ServiceContext,
    stream: &mut TcpStream,
    session: &mut crate::models::Session,
) -> anyhow::Result<()> {
    loop {
        let mut nb_header = [0u8; 4];
        match tokio::time::timeout(HEADER_TIMEOUT, stream.read_exact(&mut nb_header)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }
        let pkt_len = u32::from_be_bytes(nb_header) as usize;
        if !(4..=65536).contains(&pkt_len) {
            break;
        }
        let mut packet = vec![0u8; pkt_len];
        match tokio::time::timeout(BODY_TIMEOUT, stream.read_exact(&mut packet)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }

        if packet[..4] == SMB1_MAGIC[..] {
            let command = packet.get(4).copied().unwrap_or(0);
            if command != 0x72 {
                break;
            }
            // SMB1 Negotiate: answer in SMB2 to upgrade the dialect.
            ctx.log(
                session,
                EventKind::Request,
                serde_json::json!({"smb_version": "SMB1", "command": "NEGOTIATE"}),
            );
            stream.write_all(&build_negotiate_response()).await?;
        } else if packet[..4] == SMB2_MAGIC[..] {
            let Some(command) = read_u16(&packet, 12) else {
                break;
            };
            match command {
                0 => {
                    // NEGOTIATE
                    ctx.log(
                        session,
                        EventKind::Request,
                        serde_json::json!({"smb_version": "SMB2", "command": "NEGOTIATE"}),
                    );
                    stream.write_all(&build_negotiate_response()).await?;
                }
                1 => {
                    // SESSION_SETUP: expect NTLMSSP inside SPNEGO.
                    let Some(sig) = packet.windows(8).position(|w| w == NTLMSSP_SIGNATURE)
                    else {
                        break;
                    };
                    let Some(msg_type) = read_u32(&packet, sig + 8) else {
                        break;
                    };
                    if msg_type == NTLMSSP_NEGOTIATE {
                        let challenge = build_ntlm_challenge();
                        let response = build_session_setup_response(
                            &challenge,
                            1,
                            STATUS_MORE_PROCESSING_REQUIRED,
                        );
                        stream.write_all(&response).await?;
                        ctx.log(
                            session,
                            EventKind::Request,
                            serde_json::json!({
                                "smb_version": "SMB2",
                                "command": "SESSION_SETUP",
                                "ntlmssp": "NEGOTIATE",
                            }),
                        );
                    } else if msg_type == NTLMSSP_AUTH {
                        let mut creds = parse_ntlm_auth(&packet);
                        if let Some(map) = creds.as_object_mut() {
                            map.insert(
                                "message".to_owned(),
                                "NTLM authentication captured".into(),
                            );
                        }
                        ctx.log(session, EventKind::NtlmAuth, creds);
                        let response = build_session_setup_response(&[], 1, STATUS_SUCCESS);
                        stream.write_all(&response).await?;
                        break;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        } else {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "smb_tests.rs"]
mod tests;
