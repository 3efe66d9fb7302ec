use courier::http::parser::{Flow, ParseError, ParseHandler, ResponseParser, StatusLine, parse_request_head};
use courier::http::request::Method;

#[derive(Default)]
struct Capture {
    status: Option<StatusLine>,
    headers: Vec<(String, String)>,
    field: String,
    body: Vec<u8>,
    chunks: Vec<u64>,
    complete: bool,
}

impl ParseHandler for Capture {
    fn on_status(&mut self, status: StatusLine) -> Flow {
        self.status = Some(status);
        Flow::Continue
    }

    fn on_header_field(&mut self, name: &str) -> Flow {
        self.field = name.to_string();
        Flow::Continue
    }

    fn on_header_value(&mut self, value: &str) -> Flow {
        self.headers.push((self.field.clone(), value.to_string()));
        Flow::Continue
    }

    fn on_body(&mut self, chunk: &[u8]) -> Flow {
        self.body.extend_from_slice(chunk);
        Flow::Continue
    }

    fn on_chunk_header(&mut self, len: u64) -> Flow {
        self.chunks.push(len);
        Flow::Continue
    }

    fn on_message_complete(&mut self) -> Flow {
        self.complete = true;
        Flow::Continue
    }
}

fn feed_bytewise(parser: &mut ResponseParser, data: &[u8], capture: &mut Capture) {
    for byte in data.chunks(1) {
        let consumed = parser.execute(byte, capture).unwrap();
        assert_eq!(consumed, 1);
    }
    parser.execute(b"", capture).unwrap();
}

#[test]
fn test_parse_response_with_content_length() {
    let mut parser = ResponseParser::new();
    let mut capture = Capture::default();
    let data = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Test: yes\r\n\r\nhello";

    let consumed = parser.execute(data, &mut capture).unwrap();

    assert_eq!(consumed, data.len());
    assert!(parser.is_complete());
    assert!(capture.complete);
    assert_eq!(capture.status.unwrap().code, 200);
    assert_eq!(capture.headers.len(), 2);
    assert_eq!(capture.body, b"hello");
}

#[test]
fn test_parse_chunked_response_in_fragments() {
    let mut parser = ResponseParser::new();
    let mut capture = Capture::default();
    let data = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nTrailer: x\r\n\r\n";

    feed_bytewise(&mut parser, data, &mut capture);

    assert!(capture.complete);
    assert_eq!(capture.chunks, vec![4, 5, 0]);
    assert_eq!(capture.body, b"Wikipedia");
}

#[test]
fn test_parse_until_eof_never_completes() {
    let mut parser = ResponseParser::new();
    let mut capture = Capture::default();

    parser.execute(b"HTTP/1.0 200 OK\r\n\r\nstream", &mut capture).unwrap();
    parser.execute(b"ing", &mut capture).unwrap();

    assert!(parser.headers_complete());
    assert!(!parser.is_complete());
    assert_eq!(capture.body, b"streaming");
    assert_eq!(capture.status.unwrap().minor, 0);
}

#[test]
fn test_parse_head_response_has_no_body() {
    let mut parser = ResponseParser::for_method(&Method::HEAD);
    let mut capture = Capture::default();

    parser
        .execute(b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\n", &mut capture)
        .unwrap();

    assert!(parser.is_complete());
    assert!(capture.body.is_empty());
}

#[test]
fn test_parse_not_modified_has_no_body() {
    let mut parser = ResponseParser::new();
    let mut capture = Capture::default();

    parser.execute(b"HTTP/1.1 304 Not Modified\r\n\r\n", &mut capture).unwrap();

    assert!(parser.is_complete());
}

#[test]
fn test_parse_pause_stops_after_callback() {
    struct PauseOnStatus;
    impl ParseHandler for PauseOnStatus {
        fn on_status(&mut self, _status: StatusLine) -> Flow {
            Flow::Pause
        }
    }

    let mut parser = ResponseParser::new();
    let data = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

    let consumed = parser.execute(data, &mut PauseOnStatus).unwrap();
    assert_eq!(consumed, b"HTTP/1.1 200 OK\r\n".len());
    assert!(parser.is_paused());
    assert_eq!(parser.execute(&data[consumed..], &mut PauseOnStatus).unwrap(), 0);

    parser.unpause();
    let rest = parser.execute(&data[consumed..], &mut PauseOnStatus).unwrap();
    assert_eq!(consumed + rest, data.len());
    assert!(parser.is_complete());
}

#[test]
fn test_parse_invalid_responses() {
    let cases: [(&[u8], ParseError); 4] = [
        (b"HT/1.1 200 OK\r\n", ParseError::InvalidStatusLine),
        (b"HTTP/1.1 2000 OK\r\n", ParseError::InvalidStatusLine),
        (b"HTTP/1.1 200 OK\r\nConne\r\n", ParseError::InvalidHeader),
        (b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n", ParseError::InvalidContentLength),
    ];

    for (data, expected) in cases {
        let result = ResponseParser::new().execute(data, &mut Capture::default());
        assert_eq!(result, Err(expected));
    }
}

#[test]
fn test_parse_bad_chunk_terminator() {
    let mut parser = ResponseParser::new();
    let data = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nokXX\r\n";

    let result = parser.execute(data, &mut Capture::default());

    assert_eq!(result, Err(ParseError::InvalidChunkTerminator));
}

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, consumed) = parse_request_head(req).unwrap();

    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.target, "/");
    assert_eq!(parsed.version, "HTTP/1.1");
    assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_post_request_with_body() {
    let req = b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    let (parsed, consumed) = parse_request_head(req).unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.body, b"hello".to_vec());
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_pipelined_requests() {
    let req = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
    let (first, used) = parse_request_head(req).unwrap();
    let (second, _) = parse_request_head(&req[used..]).unwrap();

    assert_eq!(first.target, "/a");
    assert_eq!(second.target, "/b");
}

#[test]
fn test_parse_incomplete_request() {
    assert!(matches!(
        parse_request_head(b"GET / HTTP/1.1\r\nHost: example.com\r\n"),
        Err(ParseError::Incomplete)
    ));
    assert!(matches!(
        parse_request_head(b"POST /api HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello"),
        Err(ParseError::Incomplete)
    ));
}

#[test]
fn test_parse_invalid_http_method() {
    let result = parse_request_head(b"INVALID / HTTP/1.1\r\n\r\n");

    assert!(matches!(result, Err(ParseError::InvalidMethod)));
}
