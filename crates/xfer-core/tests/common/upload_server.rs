//! Minimal HTTP/1.1 upload endpoint for integration tests.
//!
//! Keeps uploaded bytes per `Upload-Id`. HEAD replies with `Upload-Offset`
//! (404 when nothing is stored); PUT stores the body at `Upload-Offset`.
//! Can be told to fail the first N PUTs after keeping a prefix of the body,
//! or to refuse every PUT with `Upload-Retry: no`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadServerOptions {
    /// Number of PUTs answered with 503 before uploads succeed.
    pub fail_first: usize,
    /// Bytes of a failed PUT's body that are kept (and reported back).
    pub keep_on_failure: u64,
    /// Answer every PUT with 400 and `Upload-Retry: no`.
    pub refuse: bool,
}

/// One PUT as seen by the server.
#[derive(Debug, Clone)]
pub struct PutRecord {
    pub upload_id: String,
    pub offset: u64,
    pub content_range: Option<String>,
    pub len: usize,
}

#[derive(Default)]
struct State {
    stored: HashMap<String, Vec<u8>>,
    puts: Vec<PutRecord>,
    heads: usize,
    failures_left: usize,
}

pub struct UploadServer {
    pub url: String,
    state: Arc<Mutex<State>>,
}

impl UploadServer {
    pub fn stored(&self, upload_id: &str) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state.stored.get(upload_id).cloned().unwrap_or_default()
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.state.lock().unwrap().puts.clone()
    }

    pub fn heads(&self) -> usize {
        self.state.lock().unwrap().heads
    }
}

pub fn start() -> UploadServer {
    start_with_options(UploadServerOptions::default())
}

/// Serve on an ephemeral port in a background thread until the process exits.
pub fn start_with_options(opts: UploadServerOptions) -> UploadServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(Mutex::new(State {
        failures_left: opts.fail_first,
        ..State::default()
    }));
    let shared = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&shared);
            thread::spawn(move || handle(stream, &state, opts));
        }
    });
    UploadServer {
        url: format!("http://127.0.0.1:{}/upload", port),
        state,
    }
}

struct Request {
    method: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    };
    let head = std::str::from_utf8(&data[..head_end]).ok()?.to_string();
    let mut lines = head.lines();
    let method = lines.next()?.split_whitespace().next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut req = Request {
        method,
        headers,
        body: data[head_end..].to_vec(),
    };
    let len: usize = req
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while req.body.len() < len {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => req.body.extend_from_slice(&buf[..n]),
        }
    }
    req.body.truncate(len);
    Some(req)
}

fn respond(stream: &mut TcpStream, status: &str, extra: &[String]) {
    let mut response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n", status);
    for h in extra {
        response.push_str(h);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");
    let _ = stream.write_all(response.as_bytes());
}

fn handle(mut stream: TcpStream, state: &Mutex<State>, opts: UploadServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Some(req) = read_request(&mut stream) else {
        return;
    };
    let upload_id = req.header("upload-id").unwrap_or("").to_string();

    if req.method.eq_ignore_ascii_case("HEAD") {
        let stored = {
            let mut state = state.lock().unwrap();
            state.heads += 1;
            state.stored.get(&upload_id).map(|b| b.len())
        };
        match stored {
            Some(n) => respond(&mut stream, "200 OK", &[format!("Upload-Offset: {}", n)]),
            None => respond(&mut stream, "404 Not Found", &[]),
        }
        return;
    }
    if !req.method.eq_ignore_ascii_case("PUT") {
        respond(&mut stream, "405 Method Not Allowed", &[]);
        return;
    }

    let offset: u64 = req
        .header("upload-offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut state = state.lock().unwrap();
    state.puts.push(PutRecord {
        upload_id: upload_id.clone(),
        offset,
        content_range: req.header("content-range").map(str::to_string),
        len: req.body.len(),
    });
    if opts.refuse {
        drop(state);
        respond(&mut stream, "400 Bad Request", &["Upload-Retry: no".to_string()]);
        return;
    }

    let fail = state.failures_left > 0;
    if fail {
        state.failures_left -= 1;
    }
    let buf = state.stored.entry(upload_id).or_default();
    if offset > buf.len() as u64 {
        let have = buf.len();
        drop(state);
        respond(&mut stream, "409 Conflict", &[format!("Upload-Offset: {}", have)]);
        return;
    }
    buf.truncate(offset as usize);
    if fail {
        let keep = (opts.keep_on_failure as usize).min(req.body.len());
        buf.extend_from_slice(&req.body[..keep]);
        let have = buf.len();
        drop(state);
        respond(
            &mut stream,
            "503 Service Unavailable",
            &[format!("Upload-Offset: {}", have)],
        );
    } else {
        buf.extend_from_slice(&req.body);
        drop(state);
        respond(&mut stream, "204 No Content", &[]);
    }
}
