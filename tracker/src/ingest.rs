//! SBS-1 ingest: one task per feed.
//!
//! Each task owns one TCP connection, reads CRLF-delimited lines, folds
//! partial messages into per-aircraft accumulators, and posts a fused
//! report whenever a picture is complete. Lost connections are retried
//! forever; a feed being down never takes the tracker down.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use shared::clock;
use shared::geodesy::Geodetic;
use shared::sbs1::{self, Accumulator};
use shared::target::{report_from_aircraft, Report, TargetId};

/// Delay between reconnection attempts to a feed.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Start an ingest task for one `host:port` feed. `source` distinguishes
/// this feed's target ids from other feeds'.
pub fn spawn(
    server: String,
    source: usize,
    observer: Geodetic,
    reports: Sender<Report>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("ingest-{source}"))
        .spawn(move || run(&server, source, &observer, &reports, &stop))
        .expect("spawn ingest thread")
}

fn run(
    server: &str,
    source: usize,
    observer: &Geodetic,
    reports: &Sender<Report>,
    stop: &AtomicBool,
) {
    let mut logged_refused = false;
    while !stop.load(Ordering::Relaxed) {
        let stream = match TcpStream::connect(server) {
            Ok(stream) => {
                info!(server, "feed connected");
                logged_refused = false;
                stream
            }
            Err(e) => {
                if !logged_refused {
                    warn!(server, "feed unavailable, retrying: {e}");
                    logged_refused = true;
                }
                std::thread::sleep(RECONNECT_DELAY);
                continue;
            }
        };
        if stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .is_err()
        {
            continue;
        }

        if !read_stream(stream, server, source, observer, reports, stop) {
            // The report channel is gone: the tracker is shutting down.
            return;
        }
        std::thread::sleep(RECONNECT_DELAY);
    }
}

/// Read lines until the connection drops or we are told to stop. Returns
/// false only when the report channel has closed.
fn read_stream(
    stream: TcpStream,
    server: &str,
    source: usize,
    observer: &Geodetic,
    reports: &Sender<Report>,
    stop: &AtomicBool,
) -> bool {
    let mut reader = BufReader::new(stream);
    let mut accumulators: HashMap<String, Accumulator> = HashMap::new();
    let mut malformed: u64 = 0;
    let mut line = String::new();

    loop {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        match reader.read_line(&mut line) {
            // EOF: the feed closed on us.
            Ok(0) => {
                debug!(server, "feed closed");
                return true;
            }
            Ok(_) => {}
            // A timeout can land mid-line; keep what has arrived so far
            // and let the next read finish it.
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!(server, "feed read failed: {e}");
                return true;
            }
        }

        let parsed = sbs1::parse(&line);
        line.clear();
        let message = match parsed {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                // Truncated and garbled lines are dropped and counted, not
                // fatal. The count keeps a noisy feed visible in the logs.
                malformed += 1;
                debug!(server, malformed, "dropping line: {e}");
                continue;
            }
        };

        let now = clock::monotonic_seconds();
        let accumulator = accumulators.entry(message.hex.clone()).or_default();
        accumulator.apply(&message, now);

        if accumulator.complete() {
            let id = TargetId::new(source, &message.hex);
            if let Some(report) = report_from_aircraft(observer, id, accumulator) {
                if reports.send(report).is_err() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;

    #[test]
    fn feeds_turn_lines_into_reports() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let feeder = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Position then velocity, plus garbage in between that must be
            // survived.
            stream
                .write_all(
                    b"MSG,3,1,1,A12345,1,,,,,,37000,,,39.079084,-77.036531,,,,,,0\r\n",
                )
                .unwrap();
            stream.write_all(b"not,an,sbs1,line\r\n").unwrap();
            stream.write_all(b"SEL,,1,1,A12345,1,,,,,,,,,,,,,,,,\r\n").unwrap();
            stream
                .write_all(b"MSG,4,1,1,A12345,1,,,,,,,400.0,90.0,,,0,,,,,\r\n")
                .unwrap();
            // Hold the connection open briefly so the reader drains it.
            std::thread::sleep(Duration::from_millis(300));
        });

        let observer = Geodetic::from_degrees(38.879_084, -77.036_531, 18.0);
        let (report_tx, report_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn(
            addr.to_string(),
            2,
            observer,
            report_tx,
            stop.clone(),
        );

        let report = report_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("a report should arrive");
        assert_eq!(report.id, TargetId::new(2, "A12345"));
        assert!(!report.in_space);

        stop.store(true, Ordering::Relaxed);
        feeder.join().unwrap();
        handle.join().unwrap();
    }
}
