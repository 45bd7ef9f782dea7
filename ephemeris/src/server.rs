//! Broadcast text server.
//!
//! Accepts TCP clients and pushes the same line stream to all of them.
//! Clients that stop reading or disconnect are dropped on the next write;
//! nobody gets to stall the propagation loop.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

/// Fan-out writer over all currently connected clients.
pub struct BroadcastServer {
    connections: Arc<Mutex<Vec<TcpStream>>>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    addr: std::net::SocketAddr,
}

impl BroadcastServer {
    /// Bind and start the listener thread.
    pub fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        info!(%local, "broadcast server listening");

        let connections: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let accept_connections = connections.clone();
        let accept_stop = stop.clone();
        let thread = std::thread::spawn(move || {
            while !accept_stop.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        debug!(%peer, "client connected");
                        stream.set_write_timeout(Some(Duration::from_millis(500))).ok();
                        accept_connections.lock().unwrap().push(stream);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            connections,
            stop,
            thread: Some(thread),
            addr: local,
        })
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    pub fn client_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Send `text` to every client, dropping the ones that fail.
    pub fn write(&self, text: &str) {
        let mut connections = self.connections.lock().unwrap();
        connections.retain_mut(|stream| match stream.write_all(text.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                debug!("dropping client: {e}");
                false
            }
        });
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn clients_receive_the_stream() {
        let server = BroadcastServer::bind("127.0.0.1:0").unwrap();
        let a = TcpStream::connect(server.addr()).unwrap();
        let b = TcpStream::connect(server.addr()).unwrap();

        // Wait for the accept thread to pick both up.
        for _ in 0..100 {
            if server.client_count() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.client_count(), 2);

        server.write("MSG,3,first\r\n");
        server.write("MSG,3,second\r\n");

        for stream in [a, b] {
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "MSG,3,first\r\n");
            line.clear();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "MSG,3,second\r\n");
        }
    }

    #[test]
    fn dead_clients_are_dropped() {
        let server = BroadcastServer::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(server.addr()).unwrap();
        for _ in 0..100 {
            if server.client_count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(client);

        // The first write may land in the kernel buffer; the follow-ups
        // notice the closed socket.
        for _ in 0..20 {
            server.write("line\r\n");
            if server.client_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.client_count(), 0);
    }
}
