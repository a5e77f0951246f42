// src/transport/codec.rs
//! Wire framing shared by the transport client and the worker server
//!
//! Frames are length-delimited. A request frame starts with an opcode byte,
//! a reply frame with a status byte; the rest of the frame is the payload
//! (error text for failed replies).

use crate::utils::errors::{Result, TreegerError};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

/// Largest accepted frame
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

const OP_PING: u8 = 0x01;
const OP_SHUTDOWN: u8 = 0x02;
const OP_CALL: u8 = 0x03;

const STATUS_OK: u8 = 0x00;
const STATUS_ERR: u8 = 0x01;

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Request sent to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Shutdown,
    Call(Bytes),
}

impl Request {
    pub fn encode(&self) -> Bytes {
        match self {
            Request::Ping => Bytes::from_static(&[OP_PING]),
            Request::Shutdown => Bytes::from_static(&[OP_SHUTDOWN]),
            Request::Call(payload) => tagged(OP_CALL, payload),
        }
    }

    pub fn decode(mut frame: BytesMut) -> Result<Self> {
        if frame.is_empty() {
            return Err(TreegerError::TransportError("Empty request frame".into()));
        }
        let op = frame.split_to(1)[0];
        match op {
            OP_PING => Ok(Request::Ping),
            OP_SHUTDOWN => Ok(Request::Shutdown),
            OP_CALL => Ok(Request::Call(frame.freeze())),
            other => Err(TreegerError::TransportError(format!(
                "Unknown opcode 0x{:02x}",
                other
            ))),
        }
    }
}

/// Reply from a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(Bytes),
    Err(String),
}

impl Reply {
    pub fn encode(&self) -> Bytes {
        match self {
            Reply::Ok(payload) => tagged(STATUS_OK, payload),
            Reply::Err(message) => tagged(STATUS_ERR, message.as_bytes()),
        }
    }

    pub fn decode(mut frame: BytesMut) -> Result<Self> {
        if frame.is_empty() {
            return Err(TreegerError::TransportError("Empty reply frame".into()));
        }
        let status = frame.split_to(1)[0];
        match status {
            STATUS_OK => Ok(Reply::Ok(frame.freeze())),
            STATUS_ERR => Ok(Reply::Err(String::from_utf8_lossy(&frame).into_owned())),
            other => Err(TreegerError::TransportError(format!(
                "Unknown reply status 0x{:02x}",
                other
            ))),
        }
    }
}

fn tagged(tag: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_u8(tag);
    buf.put_slice(payload);
    buf.freeze()
}
