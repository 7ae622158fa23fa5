use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::types::{Delta, SessionSnapshot, StateUpdate};

pub type RequestId = u64;

/// Everything the remote side can tell the client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed.
    Connected { connection_id: String, session_token: Option<String> },
    Update(StateUpdate),
    Response { id: RequestId, result: Result<String, String> },
    /// A line arrived that could not be decoded.
    Malformed(String),
    Error(String),
    Disconnected,
}

/// Duplex channel to the remote session. Implementations never block in
/// `poll`; incoming traffic is buffered until the next call.
pub trait Transport {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    /// Fire-and-forget command line.
    fn send(&mut self, line: &str) -> Result<(), TransportError>;
    /// Command line whose outcome comes back as `TransportEvent::Response`.
    fn request(&mut self, id: RequestId, line: &str) -> Result<(), TransportError>;
    fn poll(&mut self) -> Vec<TransportEvent>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Inbound {
    Hello { connection_id: String, #[serde(default)] session_token: Option<String> },
    Full { state: SessionSnapshot },
    Delta { delta: Delta },
    Response { id: RequestId, ok: bool, #[serde(default)] output: String },
    Error { message: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Outbound<'a> {
    Auth { token: &'a str },
    Command { line: &'a str },
    Request { id: RequestId, line: &'a str },
}

/// Decode one newline-delimited JSON frame.
pub fn decode_line(line: &str) -> TransportEvent {
    match serde_json::from_str::<Inbound>(line) {
        Ok(Inbound::Hello { connection_id, session_token }) => TransportEvent::Connected { connection_id, session_token },
        Ok(Inbound::Full { state }) => TransportEvent::Update(StateUpdate::Full { state }),
        Ok(Inbound::Delta { delta }) => TransportEvent::Update(StateUpdate::Delta { delta }),
        Ok(Inbound::Response { id, ok, output }) => TransportEvent::Response {
            id,
            result: if ok { Ok(output) } else { Err(output) },
        },
        Ok(Inbound::Error { message }) => TransportEvent::Error(message),
        Err(e) => TransportEvent::Malformed(format!("{}: {}", e, truncate(line, 80))),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Newline-delimited JSON over TCP. A reader thread turns incoming lines
/// into events and hands them over an mpsc channel.
pub struct TcpTransport {
    addr: String,
    token: Option<String>,
    connect_timeout: Duration,
    writer: Option<TcpStream>,
    rx: Option<Receiver<TransportEvent>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, token: Option<String>) -> Self {
        Self { addr: addr.into(), token, connect_timeout: Duration::from_secs(2), writer: None, rx: None }
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let mut addrs = self.addr.to_socket_addrs().map_err(|source| TransportError::Connect { addr: self.addr.clone(), source })?;
        addrs.next().ok_or_else(|| TransportError::Connect {
            addr: self.addr.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "address resolved to nothing"),
        })
    }

    fn write_frame(&mut self, frame: &Outbound<'_>) -> Result<(), TransportError> {
        let stream = self.writer.as_mut().ok_or(TransportError::Closed)?;
        let mut buf = serde_json::to_vec(frame)?;
        buf.push(b'\n');
        if let Err(e) = stream.write_all(&buf).and_then(|_| stream.flush()) {
            self.writer = None;
            return Err(e.into());
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect();
        let sock = self.resolve()?;
        let stream = TcpStream::connect_timeout(&sock, self.connect_timeout)
            .map_err(|source| TransportError::Connect { addr: self.addr.clone(), source })?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        self.writer = Some(stream);

        let (tx, rx) = mpsc::channel::<TransportEvent>();
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = Vec::with_capacity(64 * 1024);
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => {
                        let _ = tx.send(TransportEvent::Disconnected);
                        break;
                    }
                    Ok(_) => {
                        // A bad frame is dropped; the stream itself is still usable.
                        let ev = match std::str::from_utf8(&buf) {
                            Ok(text) => {
                                let line = text.trim_end();
                                if line.is_empty() { continue; }
                                decode_line(line)
                            }
                            Err(e) => TransportEvent::Malformed(format!("invalid utf-8 in frame: {}", e)),
                        };
                        if tx.send(ev).is_err() { break; }
                    }
                }
            }
        });
        self.rx = Some(rx);

        if let Some(token) = self.token.clone() {
            self.write_frame(&Outbound::Auth { token: &token })?;
        }
        debug!(addr = %self.addr, "transport connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.writer.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.rx = None;
    }

    fn is_connected(&self) -> bool { self.writer.is_some() }

    fn send(&mut self, line: &str) -> Result<(), TransportError> {
        self.write_frame(&Outbound::Command { line })
    }

    fn request(&mut self, id: RequestId, line: &str) -> Result<(), TransportError> {
        self.write_frame(&Outbound::Request { id, line })
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        let Some(rx) = self.rx.as_ref() else { return out; };
        loop {
            match rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !out.contains(&TransportEvent::Disconnected) {
                        warn!("transport reader thread exited");
                        out.push(TransportEvent::Disconnected);
                    }
                    break;
                }
            }
        }
        if out.iter().any(|e| *e == TransportEvent::Disconnected) {
            self.writer = None;
            self.rx = None;
        }
        out
    }
}

#[cfg(test)]
pub mod mock {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Default)]
    pub struct MockState {
        pub connected: bool,
        pub connect_calls: u32,
        /// Number of upcoming `connect` calls that fail.
        pub failing_connects: u32,
        pub fail_sends: bool,
        pub sent: Vec<String>,
        pub requests: Vec<(RequestId, String)>,
        pub inbox: VecDeque<TransportEvent>,
    }

    /// Scriptable transport; clones share state so a test can keep a handle
    /// after boxing one into the engine.
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        pub state: Rc<RefCell<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self { Self::default() }

        pub fn push(&self, ev: TransportEvent) {
            self.state.borrow_mut().inbox.push_back(ev);
        }

        pub fn sent(&self) -> Vec<String> { self.state.borrow().sent.clone() }
    }

    impl Transport for MockTransport {
        fn connect(&mut self) -> Result<(), TransportError> {
            let mut s = self.state.borrow_mut();
            s.connect_calls += 1;
            if s.failing_connects > 0 {
                s.failing_connects -= 1;
                return Err(TransportError::Connect {
                    addr: "mock".into(),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
            s.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) { self.state.borrow_mut().connected = false; }

        fn is_connected(&self) -> bool { self.state.borrow().connected }

        fn send(&mut self, line: &str) -> Result<(), TransportError> {
            let mut s = self.state.borrow_mut();
            if !s.connected || s.fail_sends { return Err(TransportError::Closed); }
            s.sent.push(line.to_string());
            Ok(())
        }

        fn request(&mut self, id: RequestId, line: &str) -> Result<(), TransportError> {
            let mut s = self.state.borrow_mut();
            if !s.connected || s.fail_sends { return Err(TransportError::Closed); }
            s.requests.push((id, line.to_string()));
            Ok(())
        }

        fn poll(&mut self) -> Vec<TransportEvent> {
            let mut s = self.state.borrow_mut();
            let out: Vec<TransportEvent> = s.inbox.drain(..).collect();
            if out.contains(&TransportEvent::Disconnected) { s.connected = false; }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    use super::*;

    #[test]
    fn decodes_frames() {
        assert_eq!(
            decode_line(r#"{"type":"hello","connection_id":"c1","session_token":"tok"}"#),
            TransportEvent::Connected { connection_id: "c1".into(), session_token: Some("tok".into()) }
        );
        assert_eq!(
            decode_line(r#"{"type":"response","id":7,"ok":false,"output":"no such pane"}"#),
            TransportEvent::Response { id: 7, result: Err("no such pane".into()) }
        );
        match decode_line(r#"{"type":"delta","delta":{"seq":3,"status_line":"x"}}"#) {
            TransportEvent::Update(StateUpdate::Delta { delta }) => {
                assert_eq!(delta.seq, 3);
                assert_eq!(delta.status_line.as_deref(), Some("x"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(decode_line("{not json"), TransportEvent::Malformed(_)));
    }

    #[test]
    fn tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut auth = String::new();
            reader.read_line(&mut auth).unwrap();
            writer.write_all(b"{\"type\":\"hello\",\"connection_id\":\"c9\"}\n").unwrap();
            let mut cmd = String::new();
            reader.read_line(&mut cmd).unwrap();
            (auth, cmd)
        });

        let mut t = TcpTransport::new(addr, Some("secret".into()));
        t.connect().unwrap();
        t.send("kill-pane -t %1").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.is_empty() && Instant::now() < deadline {
            events = t.poll();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(events[0], TransportEvent::Connected { connection_id: "c9".into(), session_token: None });

        let (auth, cmd) = server.join().unwrap();
        assert_eq!(auth.trim(), r#"{"type":"auth","token":"secret"}"#);
        assert_eq!(cmd.trim(), r#"{"type":"command","line":"kill-pane -t %1"}"#);
    }

    #[test]
    fn invalid_utf8_frame_is_dropped_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            writer.write_all(b"{\"type\":\"error\",\"message\":\"\xff\"}\n").unwrap();
            writer.write_all(b"{\"type\":\"hello\",\"connection_id\":\"c9\"}\n").unwrap();
            let mut cmd = String::new();
            BufReader::new(stream).read_line(&mut cmd).unwrap();
            cmd
        });

        let mut t = TcpTransport::new(addr, None);
        t.connect().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < 2 && Instant::now() < deadline {
            events.extend(t.poll());
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(events.len(), 2, "{events:?}");
        assert!(matches!(events[0], TransportEvent::Malformed(_)));
        assert_eq!(events[1], TransportEvent::Connected { connection_id: "c9".into(), session_token: None });
        assert!(t.is_connected());

        t.send("list-panes").unwrap();
        assert!(server.join().unwrap().contains("list-panes"));
    }

    #[test]
    fn send_without_connection_is_closed() {
        let mut t = TcpTransport::new("127.0.0.1:1", None);
        assert!(matches!(t.send("x"), Err(TransportError::Closed)));
        assert!(t.poll().is_empty());
    }
}
