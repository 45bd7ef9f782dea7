//! Length-prefixed JSON RPC over TCP.
//!
//! # Wire format
//!
//! Both directions carry a stream of frames, each `<u32 big-endian length>`
//! followed by that many bytes of JSON. Requests name a method and carry a
//! params value; responses echo the request id and carry either a result
//! value or a named error kind:
//!
//! ```text
//! -> {"id":7,"method":"slew_rate","params":{"axis":"primary","rate":0.01}}
//! <- {"id":7,"result":null}
//! <- {"id":8,"error":{"kind":"DeviceError","message":"rate rejected"}}
//! ```
//!
//! The server answers requests on a connection strictly in order. The client
//! is blocking: one outstanding request at a time, which is exactly the
//! discipline the mount hardware wants anyway.
//!
//! # Reconnection
//!
//! On transport loss the in-flight call fails with [`RpcError::TransportLost`]
//! and is not retried (the mount's state may have changed underneath it).
//! Subsequent calls attempt to reconnect, backing off exponentially from
//! 100 ms to a 2 s cap until a connection sticks.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default TCP port for the mount bridge.
pub const DEFAULT_PORT: u16 = 45345;

/// Frames larger than this are treated as protocol corruption.
const MAX_FRAME_LEN: u32 = 1 << 20;

/// Per-call socket timeout.
const CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Reconnect backoff bounds.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Error kinds carried on the wire, mirrored by [`RpcError::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    TransportLost,
    DeviceError,
    Unsupported,
    Busy,
}

#[derive(Error, Debug)]
pub enum RpcError {
    /// The TCP connection failed before a response arrived. The request may
    /// or may not have executed.
    #[error("transport lost: {0}")]
    TransportLost(String),

    /// The server executed the request and reported a failure.
    #[error("remote {kind:?}: {message}")]
    Remote { kind: ErrorKind, message: String },

    /// The peer sent something that is not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Request {
    id: u64,
    method: String,
    params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireError {
    kind: ErrorKind,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Response {
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

fn read_body(stream: &mut TcpStream, header: [u8; 4]) -> Result<Vec<u8>, RpcError> {
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(RpcError::Protocol(format!("frame length {len} too large")));
    }
    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .map_err(|e| RpcError::TransportLost(e.to_string()))?;
    Ok(payload)
}

fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, RpcError> {
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .map_err(|e| RpcError::TransportLost(e.to_string()))?;
    read_body(stream, header)
}

/// Blocking RPC client with exponential-backoff reconnection.
pub struct RpcClient {
    addr: String,
    stream: Option<TcpStream>,
    next_id: u64,
    backoff: Duration,
    next_attempt: Instant,
}

impl RpcClient {
    /// Create a client for `host:port`. Does not connect yet; the first call
    /// does.
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            stream: None,
            next_id: 0,
            backoff: BACKOFF_INITIAL,
            next_attempt: Instant::now(),
        }
    }

    /// Whether the last call left us with a live connection.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> Result<(), RpcError> {
        if self.stream.is_some() {
            return Ok(());
        }
        // Honor the backoff window: while it is open, fail fast so the
        // caller's control loop keeps its cadence.
        let now = Instant::now();
        if now < self.next_attempt {
            return Err(RpcError::TransportLost(format!(
                "reconnect backoff ({:?} remaining)",
                self.next_attempt - now
            )));
        }

        match TcpStream::connect(&self.addr) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(CALL_TIMEOUT))
                    .and_then(|()| stream.set_write_timeout(Some(CALL_TIMEOUT)))
                    .and_then(|()| stream.set_nodelay(true))
                    .map_err(|e| RpcError::TransportLost(e.to_string()))?;
                info!(addr = %self.addr, "rpc connected");
                self.stream = Some(stream);
                self.backoff = BACKOFF_INITIAL;
                Ok(())
            }
            Err(e) => {
                self.next_attempt = now + self.backoff;
                self.backoff = (self.backoff * 2).min(BACKOFF_CAP);
                Err(RpcError::TransportLost(format!(
                    "connect to {}: {e}",
                    self.addr
                )))
            }
        }
    }

    /// Call `method` with `params`, blocking for the response.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.connect()?;
        let id = self.next_id;
        self.next_id += 1;

        let request = Request {
            id,
            method: method.to_string(),
            params,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        let result = self.round_trip(id, &payload);
        if matches!(result, Err(RpcError::TransportLost(_))) {
            // Force a fresh connection next time; the old stream may have
            // half a frame in it.
            self.stream = None;
        }
        result
    }

    fn round_trip(&mut self, id: u64, payload: &[u8]) -> Result<Value, RpcError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RpcError::TransportLost("not connected".to_string()))?;

        write_frame(stream, payload).map_err(|e| RpcError::TransportLost(e.to_string()))?;
        let raw = read_frame(stream)?;
        let response: Response = serde_json::from_slice(&raw)
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        if response.id != id {
            return Err(RpcError::Protocol(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        if let Some(error) = response.error {
            return Err(RpcError::Remote {
                kind: error.kind,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

/// A handler's way of reporting failure back to the remote caller.
#[derive(Debug, Clone)]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(method: &str) -> Self {
        Self::new(ErrorKind::Unsupported, format!("unknown method {method:?}"))
    }
}

/// Method dispatch for [`RpcServer`].
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, method: &str, params: Value) -> Result<Value, ServiceError>;
}

impl<F> Handler for F
where
    F: Fn(&str, Value) -> Result<Value, ServiceError> + Send + Sync + 'static,
{
    fn handle(&self, method: &str, params: Value) -> Result<Value, ServiceError> {
        self(method, params)
    }
}

/// Threaded RPC server: one thread accepts, one thread per connection
/// answers requests in order.
pub struct RpcServer {
    listener: TcpListener,
    stop: Arc<AtomicBool>,
}

impl RpcServer {
    /// Bind to `addr` (for example `"0.0.0.0:45345"`, or port 0 in tests).
    pub fn bind<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// A flag that makes `serve` return once set. Connections in progress
    /// notice within their read timeout.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Accept and serve connections until the stop flag is set.
    pub fn serve(&self, handler: Arc<dyn Handler>) -> std::io::Result<()> {
        self.listener.set_nonblocking(true)?;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc connection accepted");
                    let handler = handler.clone();
                    let stop = self.stop.clone();
                    std::thread::spawn(move || serve_connection(stream, handler, stop));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `serve` on a background thread, returning a guard that stops the
    /// server when asked (or dropped).
    pub fn spawn(self, handler: Arc<dyn Handler>) -> std::io::Result<ServerGuard> {
        let addr = self.local_addr()?;
        let stop = self.stop_flag();
        let thread = std::thread::spawn(move || {
            if let Err(e) = self.serve(handler) {
                warn!("rpc server exited: {e}");
            }
        });
        Ok(ServerGuard {
            addr,
            stop,
            thread: Some(thread),
        })
    }
}

/// Stops the spawned server on `stop()` or drop.
pub struct ServerGuard {
    addr: std::net::SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ServerGuard {
    pub fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    pub fn stop(mut self) {
        self.stop_now();
    }

    fn stop_now(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.stop_now();
    }
}

fn serve_connection(mut stream: TcpStream, handler: Arc<dyn Handler>, stop: Arc<AtomicBool>) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        // Waiting for the next frame header may time out while the client is
        // idle; that just means we go around and look at the stop flag. Once
        // a header has arrived, anything short of a complete frame is fatal.
        let mut header = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut header) {
            match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => continue,
                _ => {
                    debug!("rpc connection closed: {e}");
                    return;
                }
            }
        }
        let raw = match read_body(&mut stream, header) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("rpc connection dropped: {e}");
                return;
            }
        };

        let response = match serde_json::from_slice::<Request>(&raw) {
            Ok(request) => {
                let id = request.id;
                match handler.handle(&request.method, request.params) {
                    Ok(result) => Response {
                        id,
                        result: Some(result),
                        error: None,
                    },
                    Err(error) => Response {
                        id,
                        result: None,
                        error: Some(WireError {
                            kind: error.kind,
                            message: error.message,
                        }),
                    },
                }
            }
            Err(e) => {
                warn!("rpc request does not parse: {e}");
                return;
            }
        };

        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("rpc response does not serialize: {e}");
                return;
            }
        };
        if write_frame(&mut stream, &payload).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_server() -> ServerGuard {
        let server = RpcServer::bind("127.0.0.1:0").unwrap();
        server
            .spawn(Arc::new(|method: &str, params: Value| match method {
                "hello" => Ok(json!("hello")),
                "echo" => Ok(params),
                "fail" => Err(ServiceError::new(ErrorKind::DeviceError, "nope")),
                other => Err(ServiceError::unsupported(other)),
            }))
            .unwrap()
    }

    #[test]
    fn round_trip() {
        let guard = echo_server();
        let mut client = RpcClient::new(&guard.addr().to_string());

        assert_eq!(client.call("hello", Value::Null).unwrap(), json!("hello"));
        let params = json!({"axis": "primary", "rate": 0.25});
        assert_eq!(client.call("echo", params.clone()).unwrap(), params);
    }

    #[test]
    fn remote_errors_carry_their_kind() {
        let guard = echo_server();
        let mut client = RpcClient::new(&guard.addr().to_string());

        match client.call("fail", Value::Null) {
            Err(RpcError::Remote { kind, message }) => {
                assert_eq!(kind, ErrorKind::DeviceError);
                assert_eq!(message, "nope");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        match client.call("no_such_method", Value::Null) {
            Err(RpcError::Remote { kind, .. }) => assert_eq!(kind, ErrorKind::Unsupported),
            other => panic!("expected unsupported, got {other:?}"),
        }
    }

    #[test]
    fn requests_are_answered_in_order() {
        let guard = echo_server();
        let mut client = RpcClient::new(&guard.addr().to_string());
        for i in 0..100 {
            let value = client.call("echo", json!(i)).unwrap();
            assert_eq!(value, json!(i));
        }
    }

    #[test]
    fn reconnects_after_server_restart() {
        // Scenario: the bridge dies mid-session and comes back on the same
        // port a few seconds later; the client recovers by itself.
        let guard = echo_server();
        let addr = guard.addr();
        let mut client = RpcClient::new(&addr.to_string());
        assert!(client.call("hello", Value::Null).is_ok());

        guard.stop();

        // The in-flight era is over: calls fail with TransportLost and are
        // not silently retried.
        let mut saw_transport_lost = false;
        for _ in 0..20 {
            match client.call("hello", Value::Null) {
                Err(RpcError::TransportLost(_)) => {
                    saw_transport_lost = true;
                    break;
                }
                Ok(_) => std::thread::sleep(Duration::from_millis(20)),
                Err(e) => panic!("unexpected error {e:?}"),
            }
        }
        assert!(saw_transport_lost);

        // Bring the server back on the same port.
        let server = RpcServer::bind(addr).unwrap();
        let _guard2 = server
            .spawn(Arc::new(|_: &str, _: Value| -> Result<Value, ServiceError> {
                Ok(json!("hello"))
            }))
            .unwrap();

        // Backoff is capped at 2 s, so recovery happens within a few seconds.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut recovered = false;
        while Instant::now() < deadline {
            if client.call("hello", Value::Null).is_ok() {
                recovered = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(recovered, "client did not reconnect in time");
    }
}
