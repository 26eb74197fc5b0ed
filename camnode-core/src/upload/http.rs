//! HTTP/1.1 framing for image uploads.
//!
//! Only the pieces the upload path needs: a request head for a single `POST`
//! with a known body length, and the status line and body framing of the
//! response.

use core::fmt;

use heapless::String;
use winnow::ascii::dec_uint;
use winnow::combinator::{preceded, terminated};
use winnow::token::{one_of, take_till};
use winnow::{ModalResult, Parser};

use crate::endpoint::{DEFAULT_HTTP_PORT, Endpoint};

/// Capacity of the encoded request head.
pub const MAX_REQUEST_HEAD: usize = 640;

/// Content type of every upload body.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Header carrying the device identifier.
pub const DEVICE_ID_HEADER: &str = "Device-ID";

/// Request head did not fit in [`MAX_REQUEST_HEAD`] bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RequestHeadOverflow;

/// Encodes the head of a `POST` carrying `content_length` bytes of JPEG.
///
/// # Errors
///
/// Returns [`RequestHeadOverflow`] when the head exceeds its capacity.
pub fn request_head(
    endpoint: &Endpoint,
    device_id: &str,
    api_key: &str,
    content_length: usize,
) -> Result<String<MAX_REQUEST_HEAD>, RequestHeadOverflow> {
    let mut head = String::new();
    write_head(&mut head, endpoint, device_id, api_key, content_length)
        .map_err(|_| RequestHeadOverflow)?;
    Ok(head)
}

fn write_head(
    out: &mut impl fmt::Write,
    endpoint: &Endpoint,
    device_id: &str,
    api_key: &str,
    content_length: usize,
) -> fmt::Result {
    write!(out, "POST {} HTTP/1.1\r\n", endpoint.path())?;
    if endpoint.port() == DEFAULT_HTTP_PORT {
        write!(out, "Host: {}\r\n", endpoint.host())?;
    } else {
        write!(out, "Host: {}:{}\r\n", endpoint.host(), endpoint.port())?;
    }
    write!(out, "{API_KEY_HEADER}: {api_key}\r\n")?;
    write!(out, "Content-Type: {IMAGE_CONTENT_TYPE}\r\n")?;
    write!(out, "{DEVICE_ID_HEADER}: {device_id}\r\n")?;
    write!(out, "Content-Length: {content_length}\r\n")?;
    out.write_str("Connection: close\r\n\r\n")
}

/// Parsed response status line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusLine {
    pub minor_version: u8,
    pub code: u16,
}

/// Status line parse failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusLineError {
    /// The line terminator has not arrived yet.
    Incomplete,
    Malformed,
}

impl fmt::Display for StatusLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Parses `HTTP/1.x NNN reason\r\n` from the start of a response.
///
/// # Errors
///
/// [`StatusLineError::Incomplete`] until the first CRLF is buffered,
/// [`StatusLineError::Malformed`] when the line is not an HTTP/1 status line.
pub fn parse_status_line(response: &[u8]) -> Result<StatusLine, StatusLineError> {
    if !response.windows(2).any(|pair| pair == b"\r\n") {
        return Err(StatusLineError::Incomplete);
    }
    let mut input = response;
    let line = status_line
        .parse_next(&mut input)
        .map_err(|_| StatusLineError::Malformed)?;
    if (100..=599).contains(&line.code) {
        Ok(line)
    } else {
        Err(StatusLineError::Malformed)
    }
}

fn status_line(input: &mut &[u8]) -> ModalResult<StatusLine> {
    (
        preceded("HTTP/1.", one_of(b'0'..=b'9')),
        preceded(b' ', dec_uint),
        terminated(take_till(0.., b'\r'), "\r\n"),
    )
        .map(|(minor, code, _reason): (u8, u16, &[u8])| StatusLine {
            minor_version: minor - b'0',
            code,
        })
        .parse_next(input)
}

/// Offset of the first body byte, once the header block is complete.
pub fn body_offset(response: &[u8]) -> Option<usize> {
    response
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|index| index + 4)
}

/// Value of the `Content-Length` header in a complete header block.
pub fn content_length(head: &[u8]) -> Option<usize> {
    head.split(|&byte| byte == b'\n').find_map(|line| {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let colon = line.iter().position(|&byte| byte == b':')?;
        let (name, value) = line.split_at(colon);
        if !name.eq_ignore_ascii_case(b"content-length") {
            return None;
        }
        core::str::from_utf8(&value[1..]).ok()?.trim().parse().ok()
    })
}
