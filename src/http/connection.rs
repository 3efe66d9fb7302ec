use std::fmt;
use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Buf, BytesMut};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, sleep_until};

use crate::client::Service;
use crate::error::{Error, ErrorCode};
use crate::http::parser::{Flow, ParseHandler, ResponseParser, StatusLine};
use crate::http::redirects::RedirectHistory;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::RequestWriter;
use crate::net::stream::{Transport, is_aborted, is_eof, is_socket_closed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State visible outside the machine task: the current machine state and
/// the socket left behind for keep-alive reuse.
pub(crate) struct Shared {
    state: AtomicU8,
    parked: Mutex<Option<Transport>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ErrorCode::Init as u8),
            parked: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ErrorCode {
        ErrorCode::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(ErrorCode::Init)
    }

    fn publish(&self, state: ErrorCode) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.state() == ErrorCode::Expired
    }

    fn park(&self, stream: Transport) {
        *self.parked.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
    }

    fn take_parked(&self) -> Option<Transport> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// One logical request driven to a single terminal outcome.
///
/// The exchange runs as its own task on the service runtime once
/// [`Connection::start`] is called; [`Connection::response`] hands out
/// handles to the eventual [`Response`].
pub struct Connection {
    id: ConnectionId,
    service: Service,
    shared: Arc<Shared>,
    outcome: watch::Receiver<Option<Arc<Response>>>,
    pending: Mutex<Option<Machine>>,
}

impl Connection {
    /// A connection that opens its own socket.
    pub fn new(service: &Service, request: Request) -> Self {
        let stream = Transport::new(request.is_ssl(), request.tls.clone());
        Self::build(service, request, stream, false, RedirectHistory::default())
    }

    /// A connection that continues on the socket `previous` left open.
    ///
    /// Falls back to a fresh socket when there is nothing to reuse. The
    /// previous response's redirect history is carried over.
    pub fn reusing(service: &Service, request: Request, previous: &Connection) -> Self {
        let history = previous
            .completed()
            .map(|response| response.redirects().clone())
            .unwrap_or_default();

        match previous.shared.take_parked() {
            Some(stream) => Self::build(service, request, stream, true, history),
            None => {
                let stream = Transport::new(request.is_ssl(), request.tls.clone());
                Self::build(service, request, stream, false, history)
            }
        }
    }

    fn build(service: &Service, request: Request, stream: Transport, reused: bool, history: RedirectHistory) -> Self {
        let id = service.next_connection_id();
        let shared = Arc::new(Shared::new());
        let (done, outcome) = watch::channel(None);

        let parser = ResponseParser::for_method(&request.method);
        let machine = Machine {
            id,
            shared: shared.clone(),
            done,
            cycle: Cycle::new(request, history),
            stream,
            parser,
            collector: Collector::default(),
            buf: BytesMut::with_capacity(4096),
            state: ErrorCode::Init,
            reused,
        };

        Self {
            id,
            service: service.clone(),
            shared,
            outcome,
            pending: Mutex::new(Some(machine)),
        }
    }

    /// Spawn the exchange. Calling it again has no effect.
    pub fn start(&self) {
        let machine = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(machine) = machine {
            tracing::trace!(conn = %self.id, reused = machine.reused, "Starting connection");
            self.service.register(self.id, self.shared.clone());
            self.service.spawn(machine.run());
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn response(&self) -> ResponseFuture {
        ResponseFuture {
            rx: self.outcome.clone(),
        }
    }

    /// The response, if the exchange has finished.
    pub fn completed(&self) -> Option<Arc<Response>> {
        self.outcome.borrow().clone()
    }

    pub fn state(&self) -> ErrorCode {
        self.shared.state()
    }

    /// Whether the post-completion retention period has run out.
    pub fn is_expired(&self) -> bool {
        self.shared.is_expired()
    }
}

/// Shared handle to a connection's single outcome.
///
/// Any number of clones may wait on it; all of them observe the same
/// response. Awaiting it directly is the same as [`ResponseFuture::wait`].
#[derive(Clone)]
pub struct ResponseFuture {
    rx: watch::Receiver<Option<Arc<Response>>>,
}

impl ResponseFuture {
    /// Wait for the response. With `throw_on_error` set on the request, a
    /// failed exchange comes back as `Err` instead.
    pub async fn wait(self) -> Result<Arc<Response>, Error> {
        deliver(self.settled().await)
    }

    /// Wait for the response regardless of `throw_on_error`. `None` means
    /// the exchange was torn down before it could finish.
    pub async fn settled(mut self) -> Option<Arc<Response>> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        }
    }

    /// Block the calling thread until [`ResponseFuture::wait`] resolves.
    ///
    /// Must not be called from a task of the runtime driving the exchange.
    pub fn blocking(self) -> Result<Arc<Response>, Error> {
        futures::executor::block_on(self.wait())
    }
}

impl IntoFuture for ResponseFuture {
    type Output = Result<Arc<Response>, Error>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

pub(crate) fn deliver(response: Option<Arc<Response>>) -> Result<Arc<Response>, Error> {
    let response =
        response.ok_or_else(|| Error::new(ErrorCode::Expired, "connection dropped before completion"))?;
    if response.request().throw_on_error && response.error().is_error() {
        return Err(response.error().clone());
    }
    Ok(response)
}

/// One hop of a request: the response being assembled and the request
/// behind it.
pub(crate) struct Cycle {
    response: Response,
}

impl Cycle {
    pub(crate) fn new(request: Request, history: RedirectHistory) -> Self {
        let mut response = Response::new(request);
        response.set_redirects(0, history);
        Self { response }
    }

    pub(crate) fn response(&self) -> &Response {
        &self.response
    }

    /// The next hop for a redirect response, or the error that ends the chain.
    ///
    /// The current response is recorded in the history unless its domain is
    /// already there, and the new request carries its cookies forward.
    pub(crate) fn follow(&self) -> Result<Cycle, Error> {
        let current = &self.response;
        let request = current.request();

        if current.redirect_count() >= request.max_redirects {
            return Err(Error::new(ErrorCode::RedirectExhausted, "redirect exhausted"));
        }
        let location = current
            .headers()
            .get("Location")
            .ok_or_else(|| Error::new(ErrorCode::RedirectError, "no Location"))?;
        let target = request
            .uri
            .resolve(location)
            .map_err(|e| Error::new(ErrorCode::RedirectError, format!("bad Location {location:?}: {e}")))?;

        let mut history = current.redirects().clone();
        let mut snapshot = current.clone();
        snapshot.take_redirects();
        history.add(snapshot);

        let mut next = request.clone();
        next.uri = target;
        next.url = None;
        next.cookies.merge(current.cookies());
        next.prepare();

        let mut response = Response::new(next);
        response.set_redirects(current.redirect_count() + 1, history);
        Ok(Cycle { response })
    }
}

/// Parser callbacks for the machine. Pauses after every event the machine
/// acts on so each phase consumes only its own part of the buffer.
#[derive(Default)]
struct Collector {
    status: Option<StatusLine>,
    field: String,
    headers: Vec<(String, String)>,
    headers_done: bool,
    content_length: Option<u64>,
    chunk_len: Option<u64>,
    body: BytesMut,
}

impl ParseHandler for Collector {
    fn on_status(&mut self, status: StatusLine) -> Flow {
        self.status = Some(status);
        Flow::Pause
    }

    fn on_header_field(&mut self, name: &str) -> Flow {
        self.field = name.to_string();
        Flow::Continue
    }

    fn on_header_value(&mut self, value: &str) -> Flow {
        self.headers.push((std::mem::take(&mut self.field), value.to_string()));
        Flow::Continue
    }

    fn on_headers_complete(&mut self, content_length: Option<u64>) -> Flow {
        self.headers_done = true;
        self.content_length = content_length;
        Flow::Pause
    }

    fn on_body(&mut self, chunk: &[u8]) -> Flow {
        self.body.extend_from_slice(chunk);
        Flow::Pause
    }

    fn on_chunk_header(&mut self, len: u64) -> Flow {
        self.chunk_len = Some(len);
        Flow::Pause
    }
}

/// Where a phase left the machine.
enum Step {
    /// Terminal state reached.
    Done,
    /// The reused socket turned out to be closed; reconnect once.
    Restart,
    /// A redirect response completed; follow it.
    Redirect,
    /// An operation came back aborted without a real failure. The phase
    /// is retried on a fresh socket under the same deadline.
    Aborted,
}

type Phase<T> = Result<T, Step>;

struct Machine {
    id: ConnectionId,
    shared: Arc<Shared>,
    done: watch::Sender<Option<Arc<Response>>>,
    cycle: Cycle,
    stream: Transport,
    parser: ResponseParser,
    collector: Collector,
    buf: BytesMut,
    state: ErrorCode,
    reused: bool,
}

impl Machine {
    async fn run(mut self) {
        let timeout = self.request().timeout;
        let mut deadline = Instant::now() + timeout;

        loop {
            let step = tokio::select! {
                biased;
                _ = sleep_until(deadline) => None,
                step = self.exchange() => Some(step),
            };

            match step {
                None => {
                    self.on_timeout();
                    break;
                }
                Some(Step::Done) => break,
                Some(Step::Restart) => {
                    self.restart();
                    deadline = Instant::now() + timeout;
                }
                Some(Step::Redirect) => {
                    if !self.redirect() {
                        break;
                    }
                }
                Some(Step::Aborted) => self.retry(),
            }
        }

        self.end().await;
    }

    fn request(&self) -> &Request {
        self.cycle.response.request()
    }

    async fn exchange(&mut self) -> Step {
        match self.exchange_phases().await {
            Ok(step) | Err(step) => step,
        }
    }

    async fn exchange_phases(&mut self) -> Phase<Step> {
        if self.reused {
            if !self.stream.is_open() {
                return Ok(Step::Restart);
            }
        } else {
            let addrs = self.resolve().await?;
            self.connect(&addrs).await?;
            self.handshake().await?;
        }

        self.write().await?;
        self.read_status().await?;
        self.read_headers().await?;
        self.read_content().await
    }

    async fn resolve(&mut self) -> Phase<Vec<SocketAddr>> {
        self.set_state(ErrorCode::Resolve);

        let uri = &self.request().uri;
        if uri.domain.is_empty() {
            let message = match &self.request().url {
                Some(url) => format!("invalid url {url:?}"),
                None => "missing host".to_string(),
            };
            return Err(self.fail(ErrorCode::ResolveError, message));
        }
        let host = uri.host().to_string();
        let port = uri.effective_port();

        match tokio::net::lookup_host((host.as_str(), port)).await {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if addrs.is_empty() {
                    return Err(self.fail(ErrorCode::ResolveError, format!("no addresses for {host}")));
                }
                tracing::trace!(conn = %self.id, domain = %host, count = addrs.len(), "Resolved");
                Ok(addrs)
            }
            Err(e) => Err(self.fail_io(ErrorCode::ResolveError, &e)),
        }
    }

    async fn connect(&mut self, addrs: &[SocketAddr]) -> Phase<()> {
        self.set_state(ErrorCode::Connect);
        let keep_alive = self.request().keep_alive;
        match self.stream.connect(addrs, keep_alive).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_io(ErrorCode::ConnectError, &e)),
        }
    }

    async fn handshake(&mut self) -> Phase<()> {
        self.set_state(ErrorCode::Handshake);
        let host = self.request().uri.host().to_string();
        match self.stream.handshake(&host).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_io(ErrorCode::HandshakeError, &e)),
        }
    }

    async fn write(&mut self) -> Phase<()> {
        self.set_state(ErrorCode::Write);
        let mut writer = RequestWriter::new(self.request());

        match writer.write_to(&mut self.stream).await {
            Ok(n) => {
                tracing::trace!(conn = %self.id, bytes = n, "Request written");
                Ok(())
            }
            Err(e) if self.stale_socket(&e) => Err(Step::Restart),
            Err(e) => Err(self.fail_io(ErrorCode::WriteError, &e)),
        }
    }

    async fn read_status(&mut self) -> Phase<()> {
        self.set_state(ErrorCode::ReadStatus);

        if let Err(e) = self.stream.read_until(&mut self.buf, b"\r\n").await {
            if self.stale_socket(&e) {
                return Err(Step::Restart);
            }
            return Err(self.fail_io(ErrorCode::ReadStatusError, &e));
        }

        let parsed = self.feed();
        match (parsed, self.collector.status.take()) {
            (Ok(n), Some(status)) if n > 0 => {
                self.cycle.response.set_status(status);
                Ok(())
            }
            (Err(e), _) => Err(self.fail(ErrorCode::ReadStatusDataError, format!("bad status data: {e}"))),
            _ => Err(self.fail(ErrorCode::ReadStatusDataError, "bad status data")),
        }
    }

    async fn read_headers(&mut self) -> Phase<()> {
        self.set_state(ErrorCode::ReadHeaders);

        if !headers_buffered(&self.buf) {
            match self.stream.read_until(&mut self.buf, b"\r\n\r\n").await {
                Ok(_) => {}
                Err(e) if is_eof(&e) => {}
                Err(e) => return Err(self.fail_io(ErrorCode::ReadHeadersError, &e)),
            }
        }
        if self.buf.is_empty() {
            return Err(self.fail(ErrorCode::ReadHeadersError, "no headers"));
        }

        match self.feed() {
            Ok(n) if n > 0 => {}
            Ok(_) => return Err(self.fail(ErrorCode::ReadHeadersError, "bad headers data")),
            Err(e) => return Err(self.fail(ErrorCode::ReadHeadersError, format!("bad headers data: {e}"))),
        }
        if !self.collector.headers_done {
            return Err(self.fail(ErrorCode::ReadHeadersError, "incomplete headers"));
        }

        for (name, value) in std::mem::take(&mut self.collector.headers) {
            self.cycle.response.push_header(name, value);
        }
        Ok(())
    }

    /// Pick the body framing from the response headers and read it.
    async fn read_content(&mut self) -> Phase<Step> {
        if self.parser.is_complete() {
            return Ok(self.succeed());
        }

        let headers = self.cycle.response.headers();
        if headers.contains_key("Content-Length") {
            let len = self.collector.content_length.unwrap_or_default();
            self.read_content_length(len).await
        } else if headers.contains("Transfer-Encoding", "chunked") {
            self.read_chunked().await
        } else {
            self.read_until_eof().await
        }
    }

    async fn read_content_length(&mut self, len: u64) -> Phase<Step> {
        self.set_state(ErrorCode::ReadContentLength);

        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let missing = len.saturating_sub(self.buf.len());
        if missing > 0 {
            if let Err(e) = self.stream.read_at_least(&mut self.buf, missing).await {
                return Err(self.fail_io(ErrorCode::ReadContentLengthError, &e));
            }
        }

        match self.feed() {
            Ok(n) if n > 0 => Ok(self.succeed()),
            Ok(_) => Err(self.fail(ErrorCode::ReadContentLengthError, "bad content data")),
            Err(e) => Err(self.fail(ErrorCode::ReadContentLengthError, format!("bad content data: {e}"))),
        }
    }

    async fn read_chunked(&mut self) -> Phase<Step> {
        loop {
            self.set_state(ErrorCode::ReadChunkHeader);
            self.collector.chunk_len = None;

            while self.collector.chunk_len.is_none() && !self.parser.is_complete() {
                if !self.buf.is_empty() {
                    match self.feed() {
                        Ok(n) if n > 0 => continue,
                        Ok(_) => return Err(self.fail(ErrorCode::ReadChunkHeaderError, "bad chunk header")),
                        Err(e) => {
                            return Err(self.fail(ErrorCode::ReadChunkHeaderError, format!("bad chunk header: {e}")));
                        }
                    }
                }
                match self.stream.read_until(&mut self.buf, b"\n").await {
                    Ok(_) => {}
                    // Peer closed between chunks without a last-chunk marker.
                    Err(e) if is_eof(&e) => return Ok(self.succeed()),
                    Err(e) => return Err(self.fail_io(ErrorCode::ReadChunkHeaderError, &e)),
                }
            }

            let len = match self.collector.chunk_len {
                Some(len) if len > 0 => usize::try_from(len).unwrap_or(usize::MAX),
                _ => return self.read_trailers().await,
            };

            self.set_state(ErrorCode::ReadChunkData);
            let missing = len.saturating_sub(self.buf.len());
            if missing > 0 {
                if let Err(e) = self.stream.read_at_least(&mut self.buf, missing).await {
                    return Err(self.fail_io(ErrorCode::ReadChunkDataError, &e));
                }
            }

            match self.feed() {
                Ok(n) if n > 0 => {}
                Ok(_) => return Err(self.fail(ErrorCode::ReadChunkDataError, "bad chunk data")),
                Err(e) => return Err(self.fail(ErrorCode::ReadChunkDataError, format!("bad chunk data: {e}"))),
            }
        }
    }

    /// Consume the trailer section after the last chunk so a kept-alive
    /// socket starts clean. A peer close here is fine.
    async fn read_trailers(&mut self) -> Phase<Step> {
        while !self.parser.is_complete() {
            if !self.buf.is_empty() {
                match self.feed() {
                    Ok(n) if n > 0 => continue,
                    Ok(_) => break,
                    Err(e) => return Err(self.fail(ErrorCode::ReadChunkHeaderError, format!("bad trailer: {e}"))),
                }
            }
            match self.stream.read_until(&mut self.buf, b"\n").await {
                Ok(_) => {}
                Err(e) if is_eof(&e) => break,
                Err(e) => return Err(self.fail_io(ErrorCode::ReadChunkHeaderError, &e)),
            }
        }
        Ok(self.succeed())
    }

    async fn read_until_eof(&mut self) -> Phase<Step> {
        self.set_state(ErrorCode::ReadUntilEof);

        loop {
            if !self.buf.is_empty() {
                match self.feed() {
                    Ok(n) if n > 0 => {}
                    Ok(_) => return Err(self.fail(ErrorCode::ReadUntilEofError, "bad content data")),
                    Err(e) => return Err(self.fail(ErrorCode::ReadUntilEofError, format!("bad content data: {e}"))),
                }
            }
            match self.stream.read_at_least(&mut self.buf, 1).await {
                Ok(_) => {}
                Err(e) if is_eof(&e) => return Ok(self.succeed()),
                Err(e) => return Err(self.fail_io(ErrorCode::ReadUntilEofError, &e)),
            }
        }
    }

    /// Hand the buffer to the parser and drop what it consumed.
    fn feed(&mut self) -> Result<usize, crate::http::parser::ParseError> {
        let result = self.parser.execute(&self.buf, &mut self.collector);
        self.parser.unpause();
        let n = result?;
        self.buf.advance(n);
        Ok(n)
    }

    fn stale_socket(&self, e: &io::Error) -> bool {
        self.reused && is_socket_closed(e) && !self.state.is_final()
    }

    fn set_state(&mut self, state: ErrorCode) {
        if self.state.is_final() && state != ErrorCode::Expired {
            return;
        }
        tracing::trace!(conn = %self.id, state = %state, "State change");
        self.state = state;
        self.shared.publish(state);
    }

    fn set_error(&mut self, error: Error) {
        if self.state.is_final() {
            return;
        }
        tracing::warn!(
            conn = %self.id,
            url = %self.request().uri,
            error = %error,
            "Request failed"
        );
        self.set_state(error.code);
        self.cycle.response.set_error(error);
    }

    fn fail(&mut self, code: ErrorCode, message: impl Into<String>) -> Step {
        self.set_error(Error::new(code, message));
        Step::Done
    }

    fn fail_io(&mut self, code: ErrorCode, e: &io::Error) -> Step {
        if is_aborted(e) {
            tracing::trace!(conn = %self.id, state = %self.state, "Ignoring aborted operation");
            return Step::Aborted;
        }
        self.fail(code, e.to_string())
    }

    /// The body is complete: follow a redirect or settle on success.
    fn succeed(&mut self) -> Step {
        let body = self.collector.body.split().freeze();
        self.cycle.response.set_raw(body);

        if self.cycle.response.is_redirect() && self.request().follow_redirects {
            return Step::Redirect;
        }
        if !self.state.is_final() {
            self.set_state(ErrorCode::Success);
            self.cycle.response.set_error(Error::success());
        }
        Step::Done
    }

    fn on_timeout(&mut self) {
        if self.state.is_final() {
            if !self.request().keep_alive {
                self.stream.close();
            }
            return;
        }
        self.set_error(Error::new(ErrorCode::Timeout, "timeout"));
    }

    /// Fresh socket, parser and buffers for another physical attempt.
    fn reset_wire(&mut self) {
        self.stream.cancel();
        self.stream = Transport::new(self.request().is_ssl(), self.request().tls.clone());
        self.parser = ResponseParser::for_method(&self.request().method);
        self.collector = Collector::default();
        self.buf.clear();
        self.reused = false;
    }

    fn restart(&mut self) {
        tracing::debug!(conn = %self.id, state = %self.state, "Reused socket closed by peer, reconnecting");
        self.cycle.response.clear_wire();
        self.reset_wire();
    }

    fn retry(&mut self) {
        tracing::debug!(conn = %self.id, state = %self.state, "Operation aborted, retrying on a fresh socket");
        self.cycle.response.clear_wire();
        self.reset_wire();
    }

    fn redirect(&mut self) -> bool {
        match self.cycle.follow() {
            Ok(next) => {
                tracing::debug!(
                    conn = %self.id,
                    status = self.cycle.response.status_code(),
                    from = %self.request().uri,
                    to = %next.response().request().uri,
                    count = next.response().redirect_count(),
                    "Following redirect"
                );
                self.cycle = next;
                self.reset_wire();
                true
            }
            Err(error) => {
                self.set_error(error);
                false
            }
        }
    }

    async fn end(self) {
        let Machine {
            id,
            shared,
            done,
            cycle,
            mut stream,
            parser,
            mut collector,
            state,
            ..
        } = self;

        let mut response = cycle.response;
        if response.raw().is_empty() && !collector.body.is_empty() {
            response.set_raw(collector.body.split().freeze());
        }

        if let Some(callback) = &response.request().final_callback {
            callback.call(&response);
        }

        let reusable = state == ErrorCode::Success
            && response.request().keep_alive
            && !response.headers().contains("Connection", "close")
            && parser.is_complete()
            && stream.is_open();
        if reusable {
            shared.park(stream);
        } else {
            stream.close();
        }

        tracing::debug!(
            conn = %id,
            state = %state,
            status = response.status_code(),
            bytes = response.raw().len(),
            kept_alive = reusable,
            "Request finished"
        );

        let store_timeout = response.request().store_timeout;
        done.send_replace(Some(Arc::new(response)));
        drop(done);

        sleep(store_timeout).await;
        shared.publish(ErrorCode::Expired);
        tracing::trace!(conn = %id, "Connection expired");
    }
}

fn headers_buffered(buf: &[u8]) -> bool {
    buf.starts_with(b"\r\n") || buf.windows(4).any(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn redirect_response(url: &str, location: Option<&str>, count: usize, max: usize) -> Cycle {
        let mut request = Request::new(url);
        request.max_redirects = max;
        request.prepare();
        let mut cycle = Cycle::new(request, RedirectHistory::default());
        cycle.response.set_status(StatusLine {
            major: 1,
            minor: 1,
            code: 301,
            reason: "Moved Permanently".into(),
        });
        if let Some(location) = location {
            cycle.response.push_header("Location".into(), location.into());
        }
        cycle.response.push_header("Set-Cookie".into(), "hop=1".into());
        cycle.response.set_redirects(count, RedirectHistory::default());
        cycle
    }

    #[test]
    fn follow_builds_the_next_hop() {
        let cycle = redirect_response("http://a.com/start", Some("http://b.com/next"), 0, 10);
        let next = cycle.follow().unwrap();
        let response = next.response();

        assert_eq!(response.redirect_count(), 1);
        assert_eq!(response.redirects().len(), 1);
        assert_eq!(response.request().uri.domain, "b.com");
        assert_eq!(response.request().headers.get("Host"), Some("b.com"));
        assert_eq!(response.request().cookies.len(), 1);
    }

    #[test]
    fn follow_resolves_relative_locations() {
        let cycle = redirect_response("http://a.com/start", Some("/elsewhere"), 0, 10);
        let next = cycle.follow().unwrap();
        assert_eq!(next.response().request().uri.target(), "/elsewhere");
        assert_eq!(next.response().request().uri.domain, "a.com");
    }

    #[test]
    fn follow_requires_budget_then_location() {
        let exhausted = redirect_response("http://a.com/", None, 3, 3);
        assert_eq!(exhausted.follow().err().map(|e| e.code), Some(ErrorCode::RedirectExhausted));

        let missing = redirect_response("http://a.com/", None, 0, 3);
        assert_eq!(missing.follow().err().map(|e| e.code), Some(ErrorCode::RedirectError));
    }

    #[tokio::test]
    async fn aborted_operation_retries_on_fresh_socket() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        });

        let service = Service::current(Default::default()).unwrap();
        let mut request = Request::new(format!("http://{addr}/"));
        request.timeout = Duration::from_secs(5);
        request.prepare();
        let connection = Connection::new(&service, request);
        if let Some(machine) = connection.pending.lock().unwrap().as_mut() {
            machine.stream.cancel();
        }

        let started = Instant::now();
        connection.start();
        let response = connection.response().await.unwrap();

        assert_eq!(response.error().code, ErrorCode::Success);
        assert_eq!(response.text(), "ok");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn headers_buffered_detects_empty_header_block() {
        assert!(headers_buffered(b"\r\nbody"));
        assert!(headers_buffered(b"A: b\r\n\r\n"));
        assert!(!headers_buffered(b"A: b\r\n"));
    }
}
