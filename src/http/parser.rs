use std::str::FromStr;

use crate::http::headers::Headers;
use crate::http::request::Method;

/// Longest status, header or chunk-size line accepted.
const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequest,
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid status line")]
    InvalidStatusLine,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("invalid content length")]
    InvalidContentLength,
    #[error("invalid chunk size")]
    InvalidChunkSize,
    #[error("missing CRLF after chunk data")]
    InvalidChunkTerminator,
    #[error("line exceeds {MAX_LINE} bytes")]
    LineTooLong,
    #[error("incomplete message")]
    Incomplete,
}

/// What a handler wants the parser to do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Pause,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub major: u8,
    pub minor: u8,
    pub code: u16,
    pub reason: String,
}

/// Callbacks fired by [`ResponseParser::execute`]. Every method defaults to
/// `Flow::Continue`.
pub trait ParseHandler {
    fn on_status(&mut self, _status: StatusLine) -> Flow {
        Flow::Continue
    }

    fn on_header_field(&mut self, _name: &str) -> Flow {
        Flow::Continue
    }

    fn on_header_value(&mut self, _value: &str) -> Flow {
        Flow::Continue
    }

    /// `content_length` is `None` when the response did not declare one.
    fn on_headers_complete(&mut self, _content_length: Option<u64>) -> Flow {
        Flow::Continue
    }

    fn on_body(&mut self, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    /// Length of the chunk that follows; 0 marks the last one.
    fn on_chunk_header(&mut self, _len: u64) -> Flow {
        Flow::Continue
    }

    fn on_message_complete(&mut self) -> Flow {
        Flow::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StatusLine,
    HeaderLine,
    Body { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Trailer,
    UntilEof,
    /// Finished but `on_message_complete` not yet delivered.
    Complete,
    Done,
}

/// Incremental HTTP/1.x response parser.
///
/// Input can be fed in fragments of any size; partial lines are buffered
/// internally between calls. A callback returning [`Flow::Pause`] stops
/// `execute` right after the bytes that triggered it, and the parser stays
/// paused until [`ResponseParser::unpause`] is called.
#[derive(Debug)]
pub struct ResponseParser {
    state: State,
    line: Vec<u8>,
    paused: bool,
    skip_body: bool,
    content_length: Option<u64>,
    chunked: bool,
    status: u16,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: State::StatusLine,
            line: Vec::new(),
            paused: false,
            skip_body: false,
            content_length: None,
            chunked: false,
            status: 0,
        }
    }

    /// Parser for the response to `method`; `HEAD` responses carry no body.
    pub fn for_method(method: &Method) -> Self {
        let mut parser = Self::new();
        parser.skip_body = *method == Method::HEAD;
        parser
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }

    /// The whole message, including any chunked trailer, has been parsed.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete | State::Done)
    }

    pub fn headers_complete(&self) -> bool {
        !matches!(self.state, State::StatusLine | State::HeaderLine)
    }

    /// Feed `data`, returning how many bytes were consumed.
    ///
    /// Consumes nothing while paused or after completion.
    pub fn execute<H: ParseHandler>(&mut self, data: &[u8], handler: &mut H) -> Result<usize, ParseError> {
        let mut pos = 0;

        while !self.paused {
            match self.state {
                State::Done => break,
                State::Complete => {
                    self.state = State::Done;
                    self.apply(handler.on_message_complete());
                }
                State::Body { remaining } => {
                    if pos == data.len() {
                        break;
                    }
                    let (chunk, left) = take(data, &mut pos, remaining);
                    self.state = if left == 0 { State::Complete } else { State::Body { remaining: left } };
                    self.apply(handler.on_body(chunk));
                }
                State::ChunkData { remaining } => {
                    if pos == data.len() {
                        break;
                    }
                    let (chunk, left) = take(data, &mut pos, remaining);
                    self.state = if left == 0 { State::ChunkDataEnd } else { State::ChunkData { remaining: left } };
                    self.apply(handler.on_body(chunk));
                }
                State::UntilEof => {
                    if pos == data.len() {
                        break;
                    }
                    let chunk = &data[pos..];
                    pos = data.len();
                    self.apply(handler.on_body(chunk));
                }
                State::StatusLine | State::HeaderLine | State::ChunkSize | State::ChunkDataEnd | State::Trailer => {
                    let Some(line) = self.take_line(data, &mut pos)? else {
                        break;
                    };
                    let line = String::from_utf8_lossy(&line).into_owned();
                    self.on_line(&line, handler)?;
                }
            }
        }

        Ok(pos)
    }

    fn apply(&mut self, flow: Flow) {
        if flow == Flow::Pause {
            self.paused = true;
        }
    }

    /// Move bytes up to and including the next `\n` into the line buffer.
    /// Returns the finished line without its terminator.
    fn take_line(&mut self, data: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, ParseError> {
        let rest = &data[*pos..];
        match rest.iter().position(|b| *b == b'\n') {
            Some(i) => {
                self.line.extend_from_slice(&rest[..i]);
                *pos += i + 1;
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            None => {
                self.line.extend_from_slice(rest);
                *pos = data.len();
                if self.line.len() > MAX_LINE {
                    return Err(ParseError::LineTooLong);
                }
                Ok(None)
            }
        }
    }

    fn on_line<H: ParseHandler>(&mut self, line: &str, handler: &mut H) -> Result<(), ParseError> {
        match self.state {
            State::StatusLine => {
                let status = parse_status_line(line)?;
                self.status = status.code;
                self.state = State::HeaderLine;
                self.apply(handler.on_status(status));
            }
            State::HeaderLine if line.is_empty() => {
                self.state = self.body_state();
                let flow = handler.on_headers_complete(self.content_length);
                self.apply(flow);
            }
            State::HeaderLine => {
                let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
                let name = name.trim();
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return Err(ParseError::InvalidHeader);
                }
                let value = value.trim();

                if name.eq_ignore_ascii_case("content-length") {
                    let len = value.parse::<u64>().map_err(|_| ParseError::InvalidContentLength)?;
                    self.content_length = Some(len);
                } else if name.eq_ignore_ascii_case("transfer-encoding") {
                    self.chunked = value
                        .split(',')
                        .any(|t| t.trim().eq_ignore_ascii_case("chunked"));
                }

                let field = handler.on_header_field(name);
                let value = handler.on_header_value(value);
                self.apply(field);
                self.apply(value);
            }
            State::ChunkSize => {
                let size = line.split(';').next().unwrap_or_default().trim();
                let len = u64::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunkSize)?;
                self.state = if len == 0 {
                    State::Trailer
                } else {
                    State::ChunkData { remaining: len }
                };
                self.apply(handler.on_chunk_header(len));
            }
            State::ChunkDataEnd => {
                if !line.is_empty() {
                    return Err(ParseError::InvalidChunkTerminator);
                }
                self.state = State::ChunkSize;
            }
            State::Trailer => {
                if line.is_empty() {
                    self.state = State::Complete;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Framing chosen once the header block ends: declared length first,
    /// then chunked, then read until the peer closes.
    fn body_state(&self) -> State {
        let bodiless = self.skip_body || (100..200).contains(&self.status) || self.status == 204 || self.status == 304;
        if bodiless {
            return State::Complete;
        }
        match self.content_length {
            Some(0) => State::Complete,
            Some(len) => State::Body { remaining: len },
            None if self.chunked => State::ChunkSize,
            None => State::UntilEof,
        }
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, remaining: u64) -> (&'a [u8], u64) {
    let available = (data.len() - *pos) as u64;
    let n = remaining.min(available) as usize;
    let chunk = &data[*pos..*pos + n];
    *pos += n;
    (chunk, remaining - n as u64)
}

fn parse_status_line(line: &str) -> Result<StatusLine, ParseError> {
    let rest = line.strip_prefix("HTTP/").ok_or(ParseError::InvalidStatusLine)?;
    let (version, rest) = rest.split_once(' ').ok_or(ParseError::InvalidStatusLine)?;
    let (major, minor) = version.split_once('.').unwrap_or((version, "0"));
    let major = major.parse::<u8>().map_err(|_| ParseError::InvalidStatusLine)?;
    let minor = minor.parse::<u8>().map_err(|_| ParseError::InvalidStatusLine)?;

    let rest = rest.trim_start();
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code.len() != 3 {
        return Err(ParseError::InvalidStatusLine);
    }
    let code = code.parse::<u16>().map_err(|_| ParseError::InvalidStatusLine)?;

    Ok(StatusLine {
        major,
        minor,
        code,
        reason: reason.trim().to_string(),
    })
}

/// A request head as read off the wire, plus its `Content-Length` body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Parse one complete request from the front of `buf`.
///
/// Returns [`ParseError::Incomplete`] until the head and declared body are
/// all present, together with the number of bytes the request occupies.
pub fn parse_request_head(buf: &[u8]) -> Result<(RequestHead, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let head = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    let method = Method::from_str(method).map_err(|_| ParseError::InvalidMethod)?;

    let mut headers = Headers::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        headers.append(name.trim(), value.trim());
    }

    let content_length = headers
        .get("Content-Length")
        .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
        .transpose()?
        .unwrap_or(0);

    if body_bytes.len() < content_length {
        return Err(ParseError::Incomplete);
    }

    let request = RequestHead {
        method,
        target: target.to_string(),
        version: version.to_string(),
        headers,
        body: body_bytes[..content_length].to_vec(),
    };

    Ok((request, headers_end + 4 + content_length))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
