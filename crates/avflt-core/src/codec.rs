//! Agent wire format: the request line an agent reads and the reply line it
//! writes back.
//!
//! This is a strict tagged parser, not a general-purpose deserializer: it
//! accepts exactly the two documented reply schema versions and rejects
//! everything else, rather than trying to be liberal in what it accepts.

use crate::error::AvError;
use crate::event::{Event, EventId};

/// Replies are capped at this many bytes, matching the transport's fixed
/// line buffer.
pub const MAX_REPLY_LEN: usize = 256;

/// A parsed reply line: `id:<int>,res:<int>[,cache:<int>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyLine {
    pub id: EventId,
    pub res: i32,
    pub cache: Option<i32>,
}

/// Parses a reply line, accepting the legacy `id:<int>,res:<int>` form and
/// the current `id:<int>,res:<int>,cache:<int>` form. Anything else,
/// including out-of-order fields or unknown tags, is `InvalidArgument`.
pub fn parse_reply(buf: &[u8]) -> Result<ReplyLine, AvError> {
    if buf.is_empty() || buf.len() > MAX_REPLY_LEN {
        return Err(AvError::InvalidArgument);
    }
    let text = std::str::from_utf8(buf).map_err(|_| AvError::InvalidArgument)?;
    let text = text.strip_suffix('\0').unwrap_or(text);

    let mut id = None;
    let mut res = None;
    let mut cache = None;

    for (index, field) in text.split(',').enumerate() {
        let (tag, value) = field.split_once(':').ok_or(AvError::InvalidArgument)?;
        match (index, tag) {
            (0, "id") => id = Some(value.parse::<EventId>().map_err(|_| AvError::InvalidArgument)?),
            (1, "res") => res = Some(value.parse::<i32>().map_err(|_| AvError::InvalidArgument)?),
            (2, "cache") => cache = Some(value.parse::<i32>().map_err(|_| AvError::InvalidArgument)?),
            _ => return Err(AvError::InvalidArgument),
        }
    }

    match (id, res) {
        (Some(id), Some(res)) => Ok(ReplyLine { id, res, cache }),
        _ => Err(AvError::InvalidArgument),
    }
}

/// Renders the request line for `event` into a buffer of at most
/// `capacity` bytes (including the terminating NUL). Fails with
/// `InvalidArgument` if it would not fit, mirroring the source filter's
/// `avflt_copy_cmd` length check.
pub fn encode_request(event: &Event, capacity: usize) -> Result<Vec<u8>, AvError> {
    let mut line = format!(
        "id:{},type:{},fd:{},pid:{},tgid:{},ppid:{},ruid:{}",
        event.id(),
        event.kind.as_wire(),
        event.fd(),
        event.identity.pid,
        event.identity.tgid,
        event.identity.ppid,
        event.identity.ruid,
    );
    if let Some(path) = &event.path {
        if !path.is_empty() {
            line.push_str(",path:");
            line.push_str(path);
        }
    }
    if line.len() + 1 > capacity {
        return Err(AvError::InvalidArgument);
    }
    let mut bytes = line.into_bytes();
    bytes.push(0);
    Ok(bytes)
}
