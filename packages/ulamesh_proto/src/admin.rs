//! Framed ASCII protocol spoken on the admin socket.
//!
//! A request is one tagged frame: `[tag: u8][len: u16 be][param: len
//! ASCII bytes]`. A reply is a sequence of frames in the same shape;
//! frames tagged [`REPLY_LINE`] carry one line of output each, and the
//! sequence ends with a frame whose tag repeats the request's tag and
//! whose body is the operation's summary line.

use std::fmt;

use thiserror::Error;

/// Admin operations, by wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestTag {
    /// List tunnels.
    Tunnels = 1,
    /// Dump the prototype route table.
    Routes = 2,
    /// Dump the realised route table.
    Realised = 3,
    /// Run a reconciliation pass now.
    Realise = 4,
    /// Flush learned routes and restart discovery.
    Reset = 5,
    /// Raise trust for every active tunnel peer.
    Trust = 6,
    /// Whitelist a peer and ask the overlay to connect.
    Add = 7,
    /// Enable verbose per-packet logging.
    DebugOn = 8,
    /// Disable verbose per-packet logging.
    DebugOff = 9,
}

/// Tag of a reply frame carrying one line of output.
pub const REPLY_LINE: u8 = 0;

impl RequestTag {
    pub fn from_wire(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => RequestTag::Tunnels,
            2 => RequestTag::Routes,
            3 => RequestTag::Realised,
            4 => RequestTag::Realise,
            5 => RequestTag::Reset,
            6 => RequestTag::Trust,
            7 => RequestTag::Add,
            8 => RequestTag::DebugOn,
            9 => RequestTag::DebugOff,
            _ => return None,
        })
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestTag::Tunnels => "tunnels",
            RequestTag::Routes => "routes",
            RequestTag::Realised => "realised",
            RequestTag::Realise => "realise",
            RequestTag::Reset => "reset",
            RequestTag::Trust => "trust",
            RequestTag::Add => "add",
            RequestTag::DebugOn => "debug on",
            RequestTag::DebugOff => "debug off",
        })
    }
}

/// One admin request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tag: RequestTag,
    /// Operation parameter. Only `Add` uses one (the encoded peer id).
    pub param: String,
}

impl Request {
    pub fn new(tag: RequestTag) -> Self {
        Self {
            tag,
            param: String::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.tag as u8, self.param.as_bytes())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, AdminError> {
        let (tag, body) = parse_frame(bytes)?;
        let tag = RequestTag::from_wire(tag).ok_or(AdminError::UnknownTag(tag))?;
        let param = ascii_body(body)?;
        Ok(Self { tag, param })
    }
}

/// One frame of an admin reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A line of output for the operation in progress.
    Line(String),
    /// The terminating summary line; `tag` repeats the request's tag.
    Done { tag: RequestTag, summary: String },
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Line(line) => encode_frame(REPLY_LINE, line.as_bytes()),
            Reply::Done { tag, summary } => encode_frame(*tag as u8, summary.as_bytes()),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, AdminError> {
        let (tag, body) = parse_frame(bytes)?;
        let text = ascii_body(body)?;
        if tag == REPLY_LINE {
            Ok(Reply::Line(text))
        } else {
            let tag = RequestTag::from_wire(tag).ok_or(AdminError::UnknownTag(tag))?;
            Ok(Reply::Done { tag, summary: text })
        }
    }
}

/// Frame length implied by a 3-byte header, for readers that need to
/// know how many body bytes to expect.
pub fn body_len(header: &[u8; 3]) -> usize {
    u16::from_be_bytes([header[1], header[2]]) as usize
}

fn encode_frame(tag: u8, body: &[u8]) -> Vec<u8> {
    debug_assert!(body.len() <= u16::MAX as usize);
    let mut bytes = Vec::with_capacity(3 + body.len());
    bytes.push(tag);
    bytes.extend_from_slice(&(body.len() as u16).to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

fn parse_frame(bytes: &[u8]) -> Result<(u8, &[u8]), AdminError> {
    if bytes.len() < 3 {
        return Err(AdminError::Truncated);
    }
    let body_len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    if bytes.len() != 3 + body_len {
        return Err(AdminError::Truncated);
    }
    Ok((bytes[0], &bytes[3..]))
}

fn ascii_body(body: &[u8]) -> Result<String, AdminError> {
    if !body.is_ascii() {
        return Err(AdminError::NotAscii);
    }
    String::from_utf8(body.to_vec()).map_err(|_| AdminError::NotAscii)
}

/// An error representing a malformed admin frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("frame is truncated")]
    Truncated,

    #[error("unknown admin tag {0}")]
    UnknownTag(u8),

    #[error("frame body is not ASCII")]
    NotAscii,
}
