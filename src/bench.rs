//! Closed-loop load generator.
//!
//! Each client thread owns one connection and repeatedly sends a frame and
//! waits for its echo. Requests are only counted between the end of the
//! warm-up period and the end of the measurement period; a short cool-down
//! afterwards keeps the server under the same load while the counters stop.

use crate::config::BenchArgs;
use crate::protocols::echo::parser::decode_length;
use crate::protocols::echo::{encode_frame, HEADER_SIZE};
use crate::runtime::{resolve, BlockingReader};
use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const COOL_DOWN: Duration = Duration::from_millis(500);

/// Lower bound on how long a client waits for one echo.
const MIN_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a load run.
#[derive(Debug)]
pub struct Report {
    /// Requests completed during the measurement period.
    pub requests: u64,
    /// Length of the measurement period.
    pub elapsed: Duration,
    /// Per-request latency in nanoseconds, when recording was requested.
    pub latencies: Option<Vec<u64>>,
}

impl Report {
    pub fn msgs_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.requests as f64 / secs
    }

    /// Mean latency in microseconds.
    pub fn average_latency_us(&self) -> Option<f64> {
        let latencies = self.latencies.as_ref()?;
        if latencies.is_empty() {
            return None;
        }
        let sum: u64 = latencies.iter().sum();
        Some(sum as f64 / latencies.len() as f64 / 1000.0)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests in {} ms = {:.3} msgs/s",
            self.requests,
            self.elapsed.as_millis(),
            self.msgs_per_sec()
        )?;
        if let Some(average) = self.average_latency_us() {
            write!(f, " average latency: {average:.3} us")?;
        }
        Ok(())
    }
}

/// Run the load generator with the periods from `args`.
pub fn run(args: &BenchArgs) -> io::Result<Report> {
    run_for(
        args,
        Duration::from_secs(args.warmup_secs),
        Duration::from_secs(args.duration_secs),
    )
}

/// Run the load generator with explicit warm-up and measurement periods.
pub fn run_for(args: &BenchArgs, warmup: Duration, measure: Duration) -> io::Result<Report> {
    let addr = resolve(&args.target)?;
    let record = args.latency_out.is_some();
    let request = request_frame(args.message_size);
    let timeout = read_timeout(measure);

    let mut clients = Vec::with_capacity(args.clients);
    for _ in 0..args.clients {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        clients.push(Client::new(stream, request.clone(), record));
    }

    info!(
        server = %addr,
        clients = args.clients,
        message_size = args.message_size,
        warmup_ms = warmup.as_millis() as u64,
        measure_ms = measure.as_millis() as u64,
        "Starting load"
    );

    let count = AtomicBool::new(false);
    let quit = AtomicBool::new(false);

    let (results, elapsed) = thread::scope(|scope| {
        let handles: Vec<_> = clients
            .into_iter()
            .map(|client| {
                let count = &count;
                let quit = &quit;
                scope.spawn(move || client.run(count, quit))
            })
            .collect();

        thread::sleep(warmup);
        let start = Instant::now();
        count.store(true, Ordering::Relaxed);
        thread::sleep(measure);
        count.store(false, Ordering::Relaxed);
        let elapsed = start.elapsed();

        thread::sleep(COOL_DOWN);
        quit.store(true, Ordering::Relaxed);

        let results: Vec<io::Result<ClientStats>> = handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("client thread panicked")))
            })
            .collect();
        (results, elapsed)
    });

    let mut requests = 0;
    let mut latencies = record.then(Vec::new);
    for result in results {
        let stats = result?;
        requests += stats.requests;
        if let Some(all) = latencies.as_mut() {
            all.extend(stats.latencies);
        }
    }

    if let (Some(path), Some(latencies)) = (&args.latency_out, &latencies) {
        write_latencies(path, latencies)?;
        debug!(path = %path.display(), count = latencies.len(), "Wrote latencies");
    }

    Ok(Report {
        requests,
        elapsed,
        latencies,
    })
}

/// A server silent for this long fails the run instead of hanging it.
fn read_timeout(measure: Duration) -> Duration {
    (measure + COOL_DOWN).max(MIN_READ_TIMEOUT)
}

/// Payload bytes 1, 2, 3, ... wrapping at 256.
fn request_frame(message_size: usize) -> Bytes {
    let payload: Vec<u8> = (1..=message_size).map(|i| i as u8).collect();
    encode_frame(&payload)
}

fn write_latencies(path: &Path, latencies: &[u64]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for latency in latencies {
        writeln!(out, "{latency}")?;
    }
    out.flush()
}

struct ClientStats {
    requests: u64,
    latencies: Vec<u64>,
}

struct Client {
    reader: BlockingReader<TcpStream>,
    request: Bytes,
    response: Vec<u8>,
    record: bool,
}

impl Client {
    fn new(stream: TcpStream, request: Bytes, record: bool) -> Self {
        let response = vec![0u8; request.len()];
        Self {
            reader: BlockingReader::new(stream),
            request,
            response,
            record,
        }
    }

    fn run(mut self, count: &AtomicBool, quit: &AtomicBool) -> io::Result<ClientStats> {
        let mut stats = ClientStats {
            requests: 0,
            latencies: Vec::new(),
        };

        let mut start = Instant::now();
        while !quit.load(Ordering::Relaxed) {
            self.reader.get_mut().write_all(&self.request)?;
            self.read_echo()?;
            let end = Instant::now();

            if count.load(Ordering::Relaxed) {
                stats.requests += 1;
                if self.record {
                    stats.latencies.push((end - start).as_nanos() as u64);
                }
            }
            start = end;
        }

        Ok(stats)
    }

    fn read_echo(&mut self) -> io::Result<()> {
        let (header, payload) = self.response.split_at_mut(HEADER_SIZE);

        if self.reader.read(header)? == 0 {
            return Err(closed());
        }
        let length = decode_length(header) as usize;
        if length != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("echo declared {length} bytes, sent {}", payload.len()),
            ));
        }
        if !payload.is_empty() && self.reader.read(payload)? == 0 {
            return Err(closed());
        }

        if self.response[..] != self.request[..] {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "echo does not match request",
            ));
        }
        Ok(())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection")
}
