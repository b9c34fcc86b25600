//! Minimal HTTP/1.1 server with Range support for integration tests.
//!
//! Serves a single static body from a background thread. Options simulate
//! the awkward servers the downloader has to survive: range support missing,
//! expired-link status codes, throttled bodies, truncated bodies.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Respond to every GET with this status and no body.
    pub status_override: Option<u16>,
    /// Sleep between 64 KiB body chunks to simulate a slow link.
    pub throttle: Option<Duration>,
    /// Serve at most this many bytes of the requested window, then close.
    pub truncate_to: Option<usize>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            status_override: None,
            throttle: None,
            truncate_to: None,
        }
    }
}

/// Start a server serving `body`; returns its base URL.
pub fn start(body: Vec<u8>) -> String {
    start_with_options(body, RangeServerOptions::default())
}

/// Like [`start`] but with customized behaviour.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let body = Arc::new(body);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            thread::spawn(move || handle(stream, &body, opts));
        }
    });
    format!("http://127.0.0.1:{port}/payload.bin")
}

fn handle(mut stream: std::net::TcpStream, body: &[u8], opts: RangeServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
        return;
    }
    if let Some(status) = opts.status_override {
        let _ = stream.write_all(
            format!("HTTP/1.1 {status} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        );
        return;
    }

    let total = body.len() as u64;
    let (status, content_range, slice) = match (opts.support_ranges, range) {
        (true, Some((start, end_incl))) => {
            let start = start.min(total) as usize;
            let end_excl = (end_incl.saturating_add(1)).min(total) as usize;
            (
                "206 Partial Content",
                Some(format!(
                    "bytes {}-{}/{}",
                    start,
                    end_excl.saturating_sub(1),
                    total
                )),
                &body[start..end_excl],
            )
        }
        _ => ("200 OK", None, body),
    };

    let served = opts.truncate_to.map_or(slice.len(), |cap| cap.min(slice.len()));
    let mut header = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\n", slice.len());
    if let Some(content_range) = content_range {
        header.push_str(&format!("Content-Range: {content_range}\r\n"));
    }
    header.push_str("Accept-Ranges: bytes\r\nConnection: close\r\n\r\n");
    if stream.write_all(header.as_bytes()).is_err() {
        return;
    }

    let mut sent = 0usize;
    while sent < served {
        let end = (sent + 64 * 1024).min(served);
        if stream.write_all(&slice[sent..end]).is_err() {
            return;
        }
        sent = end;
        if let Some(throttle) = opts.throttle {
            thread::sleep(throttle);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) from `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
