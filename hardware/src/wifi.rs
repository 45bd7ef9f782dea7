//! Sky-Watcher Wi-Fi HOOTL server.
//!
//! Listens on UDP and speaks the same motor-controller command language as
//! the real mount head does on port 11880, backed by a simulated pair of
//! motors. Used for end-to-end testing of the Wi-Fi path, including its
//! retransmission behavior: the server can be told to drop every Nth
//! datagram on the floor.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::skywatcher::{decode_int_2, decode_int_6, encode_int_2, encode_int_6};

/// Counts per revolution reported by the simulated motors (an EQ6-class
/// worm gear).
const CPR: i64 = 9_024_000;
/// High speed ratio.
const HSR: i64 = 16;
/// Step timer frequency in Hz.
const TIMER_FREQ: i64 = 64_935;

#[derive(Debug, Default, Clone, Copy)]
struct MotorState {
    /// Position in counts, wrapped to one revolution.
    position: f64,
    /// Step period last written, timer ticks per step.
    step_period: i64,
    /// Counterclockwise bit from the motion mode.
    ccw: bool,
    running: bool,
}

impl MotorState {
    fn advance(&mut self, dt: f64) {
        if self.running && self.step_period > 0 {
            let counts_per_sec = (HSR * TIMER_FREQ) as f64 / self.step_period as f64;
            let direction = if self.ccw { -1.0 } else { 1.0 };
            self.position = (self.position + direction * counts_per_sec * dt)
                .rem_euclid(CPR as f64);
        }
    }

    fn status_word(&self) -> i64 {
        let mut word = 0x001; // init done
        if self.running {
            word |= 0x010 | 0x400;
        }
        if self.ccw {
            word |= 0x200;
        }
        word
    }
}

/// Handle to a running Wi-Fi HOOTL server. Stops on drop.
pub struct WifiHootlServer {
    addr: std::net::SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WifiHootlServer {
    /// Bind `addr` (use port 0 in tests, 11880 to stand in for a real
    /// mount) and serve until dropped. `drop_every`, if set, silently
    /// discards every Nth received datagram to exercise client
    /// retransmission.
    pub fn spawn(addr: &str, drop_every: Option<u32>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        let local = socket.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let thread = std::thread::spawn(move || serve(socket, stop_thread, drop_every));
        debug!(%local, "wifi hootl server listening");
        Ok(Self {
            addr: local,
            stop,
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }
}

impl Drop for WifiHootlServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn serve(socket: UdpSocket, stop: Arc<AtomicBool>, drop_every: Option<u32>) {
    let mut motors = [MotorState::default(), MotorState::default()];
    let mut last_advance = Instant::now();
    let mut received: u32 = 0;
    let mut buffer = [0u8; 64];

    while !stop.load(Ordering::Relaxed) {
        let (len, peer) = match socket.recv_from(&mut buffer) {
            Ok(ok) => ok,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => return,
        };

        let now = Instant::now();
        let dt = (now - last_advance).as_secs_f64();
        last_advance = now;
        for motor in &mut motors {
            motor.advance(dt);
        }

        received += 1;
        if let Some(n) = drop_every {
            if received % n == 0 {
                trace!("dropping datagram on purpose");
                continue;
            }
        }

        let request: String = buffer[..len].iter().map(|&b| b as char).collect();
        let reply = match handle(&request, &mut motors) {
            Some(body) => format!("={body}\r"),
            None => "!0\r".to_string(),
        };
        trace!(?request, ?reply, "wifi hootl exchange");
        let bytes: Vec<u8> = reply.chars().map(|c| c as u8).collect();
        let _ = socket.send_to(&bytes, peer);
    }
}

/// Execute one command. Returns the reply body, or `None` for an error
/// reply.
fn handle(request: &str, motors: &mut [MotorState; 2]) -> Option<String> {
    let body = request.strip_prefix(':')?.strip_suffix('\r')?;
    let mut chars = body.chars();
    let opcode = chars.next()?;
    let axis_digit = chars.next()?;
    let args: String = chars.collect();
    let axis = match axis_digit {
        '1' => 0usize,
        '2' => 1usize,
        _ => return None,
    };
    let motor = &mut motors[axis];

    match opcode {
        // Firmware version.
        'e' => Some("0210A1".to_string()),
        // Counts per revolution.
        'a' => Some(encode_int_6(CPR)),
        // High speed ratio.
        'g' => Some(encode_int_2(HSR)),
        // Step timer frequency.
        'b' => Some(encode_int_6(TIMER_FREQ)),
        // Initialization done.
        'F' => Some(String::new()),
        // Status word.
        'f' => Some(format!("{:03X}", motor.status_word())),
        // Position.
        'j' => Some(encode_int_6(motor.position as i64)),
        // Motion mode: bit 0 of the first hex pair is the direction.
        'G' => {
            if motor.running {
                return None;
            }
            let mode = decode_int_2(&args).ok()?;
            motor.ccw = mode & 0x01 != 0;
            Some(String::new())
        }
        // Step period.
        'I' => {
            motor.step_period = decode_int_6(&args).ok()?;
            Some(String::new())
        }
        // Start motion.
        'J' => {
            motor.running = true;
            Some(String::new())
        }
        // Stop motion.
        'K' => {
            motor.running = false;
            Some(String::new())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(motors: &mut [MotorState; 2], command: &str) -> Option<String> {
        handle(&format!(":{command}\r"), motors)
    }

    #[test]
    fn scaling_constant_queries() {
        let mut motors = [MotorState::default(), MotorState::default()];
        assert_eq!(exchange(&mut motors, "a1").unwrap(), encode_int_6(CPR));
        assert_eq!(exchange(&mut motors, "g2").unwrap(), encode_int_2(HSR));
        assert_eq!(exchange(&mut motors, "b1").unwrap(), encode_int_6(TIMER_FREQ));
        assert_eq!(exchange(&mut motors, "e1").unwrap(), "0210A1");
    }

    #[test]
    fn motion_command_sequence() {
        let mut motors = [MotorState::default(), MotorState::default()];
        assert!(exchange(&mut motors, "G130").is_some());
        assert!(exchange(&mut motors, "I1480000").is_some());
        assert!(exchange(&mut motors, "J1").is_some());
        assert!(motors[0].running);
        assert!(!motors[0].ccw);

        // Motion mode cannot change while running.
        assert!(exchange(&mut motors, "G131").is_none());

        motors[0].advance(1.0);
        assert!(motors[0].position > 0.0);

        assert!(exchange(&mut motors, "K1").is_some());
        assert!(!motors[0].running);
    }

    #[test]
    fn malformed_requests_are_errors() {
        let mut motors = [MotorState::default(), MotorState::default()];
        assert!(handle("j1\r", &mut motors).is_none());
        assert!(handle(":j3\r", &mut motors).is_none());
        assert!(handle(":q1\r", &mut motors).is_none());
    }

    #[test]
    fn position_wraps_at_one_revolution() {
        let mut motor = MotorState {
            position: (CPR - 10) as f64,
            step_period: 1,
            ccw: false,
            running: true,
        };
        motor.advance(1.0);
        assert!(motor.position < CPR as f64);
        assert!(motor.position >= 0.0);
    }
}
