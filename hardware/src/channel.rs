//! Command/response channels to the mount electronics.
//!
//! Both supported command languages are half-duplex exchanges of short
//! byte strings, differing only in framing:
//!
//! - NexStar: the command goes out verbatim, the reply ends with `#`.
//! - Sky-Watcher: the command is wrapped as `:<cmd><CR>`; replies are
//!   `=<data><CR>` on success and `!<code><CR>` on failure.
//!
//! Commands and replies may contain arbitrary byte values (NexStar
//! pass-through commands embed binary arguments), so strings here are
//! Latin-1 style: one `char` per byte, values 0-255 mapped directly.

use std::io::{Read, Write};
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::mount::MountError;
use shared::config::MountProtocol;

/// How long to wait for a complete serial reply.
const SERIAL_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for a UDP reply before the single retransmit.
const UDP_REPLY_TIMEOUT: Duration = Duration::from_millis(200);

/// Send one command, get one reply. Implementations own the transport and
/// its framing; callers see unframed payloads.
pub trait Channel: Send {
    fn speak(&mut self, command: &str) -> Result<String, MountError>;
}

/// Wire framing for the two command languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    NexStar,
    SkyWatcher,
}

impl Framing {
    pub fn for_protocol(protocol: MountProtocol) -> Self {
        match protocol {
            MountProtocol::NexStarHandControl => Framing::NexStar,
            MountProtocol::SkyWatcherUsb
            | MountProtocol::SkyWatcherEqmod
            | MountProtocol::SkyWatcherWifi => Framing::SkyWatcher,
        }
    }

    /// Frame a command for the wire.
    pub fn encode(self, command: &str) -> Vec<u8> {
        match self {
            Framing::NexStar => command.chars().map(|c| c as u8).collect(),
            Framing::SkyWatcher => {
                let mut bytes = Vec::with_capacity(command.len() + 2);
                bytes.push(b':');
                bytes.extend(command.chars().map(|c| c as u8));
                bytes.push(b'\r');
                bytes
            }
        }
    }

    /// The byte that ends a reply.
    pub fn terminator(self) -> u8 {
        match self {
            Framing::NexStar => b'#',
            Framing::SkyWatcher => b'\r',
        }
    }

    /// Unframe a complete reply (terminator still attached).
    pub fn decode(self, raw: &[u8]) -> Result<String, MountError> {
        let text: String = raw.iter().map(|&b| b as char).collect();
        match self {
            Framing::NexStar => text
                .strip_suffix('#')
                .map(str::to_string)
                .ok_or_else(|| MountError::Protocol(format!("unterminated reply {text:?}"))),
            Framing::SkyWatcher => {
                let body = text
                    .strip_suffix('\r')
                    .ok_or_else(|| MountError::Protocol(format!("unterminated reply {text:?}")))?;
                if let Some(data) = body.strip_prefix('=') {
                    Ok(data.to_string())
                } else if let Some(code) = body.strip_prefix('!') {
                    Err(MountError::Device(format!(
                        "motor controller error code {code}"
                    )))
                } else {
                    Err(MountError::Protocol(format!("malformed reply {text:?}")))
                }
            }
        }
    }
}

/// A mount on a local serial port.
pub struct SerialChannel {
    port: Box<dyn serialport::SerialPort>,
    framing: Framing,
}

impl SerialChannel {
    /// Open `path` at the protocol's baud rate (9600 8N1 for NexStar and
    /// EQMOD, 115200 for the USB motor controller port).
    pub fn open(path: &str, protocol: MountProtocol) -> Result<Self, MountError> {
        let port = serialport::new(path, protocol.baud_rate())
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| MountError::Transport(format!("open {path}: {e}")))?;
        debug!(path, "serial port open");
        Ok(Self {
            port,
            framing: Framing::for_protocol(protocol),
        })
    }
}

impl Channel for SerialChannel {
    fn speak(&mut self, command: &str) -> Result<String, MountError> {
        // Anything left over from a previous exchange is garbage now.
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| MountError::Transport(e.to_string()))?;

        let framed = self.framing.encode(command);
        trace!(command, "serial send");
        self.port.write_all(&framed)?;
        self.port.flush()?;

        let mut reply = Vec::new();
        let deadline = Instant::now() + SERIAL_REPLY_TIMEOUT;
        let terminator = self.framing.terminator();
        loop {
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(1) => {
                    reply.push(byte[0]);
                    if byte[0] == terminator {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() > deadline {
                return Err(MountError::Transport(format!(
                    "no reply to {command:?} within {SERIAL_REPLY_TIMEOUT:?}"
                )));
            }
        }
        trace!(?reply, "serial recv");
        self.framing.decode(&reply)
    }
}

/// A Sky-Watcher mount head reached over Wi-Fi, UDP port 11880.
///
/// The wire protocol has no field for a request tag, so request/reply
/// pairing is positional: stale datagrams are drained before each request,
/// and a reply is only accepted for the request just sent. No reply within
/// 200 ms triggers a single retransmission; a second silence surfaces a
/// transient transport error for the caller to ride through.
pub struct UdpChannel {
    socket: UdpSocket,
    /// Requests sent, for log correlation across retransmits.
    sequence: u64,
}

/// Default UDP port a Sky-Watcher mount head listens on.
pub const SKYWATCHER_WIFI_PORT: u16 = 11_880;

impl UdpChannel {
    pub fn connect(addr: &str) -> Result<Self, MountError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket
            .connect(addr)
            .map_err(|e| MountError::Transport(format!("connect {addr}: {e}")))?;
        socket.set_read_timeout(Some(UDP_REPLY_TIMEOUT))?;
        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    fn drain_stale(&mut self) {
        self.socket.set_nonblocking(true).ok();
        let mut buffer = [0u8; 64];
        while let Ok(n) = self.socket.recv(&mut buffer) {
            trace!(bytes = n, "discarding stale datagram");
        }
        self.socket.set_nonblocking(false).ok();
        self.socket.set_read_timeout(Some(UDP_REPLY_TIMEOUT)).ok();
    }
}

impl Channel for UdpChannel {
    fn speak(&mut self, command: &str) -> Result<String, MountError> {
        self.drain_stale();

        let framed = Framing::SkyWatcher.encode(command);
        self.sequence += 1;
        let sequence = self.sequence;

        for attempt in 0..2 {
            if attempt > 0 {
                debug!(sequence, command, "retransmitting");
            }
            self.socket.send(&framed)?;

            let mut buffer = [0u8; 64];
            match self.socket.recv(&mut buffer) {
                Ok(n) => {
                    trace!(sequence, ?command, "udp reply");
                    return Framing::SkyWatcher.decode(&buffer[..n]);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }

        warn!(sequence, command, "no reply after retransmission");
        Err(MountError::Transport(format!(
            "no reply to {command:?} after retransmission"
        )))
    }
}

/// Pick a serial device for `serial_port: auto`: the first USB serial port
/// the OS reports, falling back to probing the conventional device names.
pub fn auto_detect_serial() -> Option<String> {
    if let Ok(ports) = serialport::available_ports() {
        for port in ports {
            if matches!(port.port_type, serialport::SerialPortType::UsbPort(_)) {
                return Some(port.port_name);
            }
        }
    }
    (0..10)
        .map(|i| format!("/dev/ttyUSB{i}"))
        .find(|path| std::path::Path::new(path).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nexstar_framing() {
        assert_eq!(Framing::NexStar.encode("e"), b"e");
        let binary = format!("P{}{}{}{}{}{}{}", '\u{3}', '\u{10}', '\u{6}', '\u{ff}', '\u{10}', '\u{0}', '\u{0}');
        let encoded = Framing::NexStar.encode(&binary);
        assert_eq!(encoded, vec![b'P', 3, 16, 6, 0xff, 16, 0, 0]);

        assert_eq!(Framing::NexStar.decode(b"12AB,34CD#").unwrap(), "12AB,34CD");
        assert!(Framing::NexStar.decode(b"12AB").is_err());
    }

    #[test]
    fn skywatcher_framing() {
        assert_eq!(Framing::SkyWatcher.encode("j1"), b":j1\r");
        assert_eq!(Framing::SkyWatcher.decode(b"=563412\r").unwrap(), "563412");
        assert!(matches!(
            Framing::SkyWatcher.decode(b"!0\r"),
            Err(MountError::Device(_))
        ));
        assert!(matches!(
            Framing::SkyWatcher.decode(b"563412\r"),
            Err(MountError::Protocol(_))
        ));
    }
}
