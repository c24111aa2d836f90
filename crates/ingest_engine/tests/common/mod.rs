//! Loopback HTTP stubs for transport and end-to-end tests.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Serve HTTP on a loopback port. Each connection gets a 200 with `body`,
/// or a 500 when the request head contains `fail_marker`.
pub fn spawn_http_stub(
    body: &'static str,
    fail_marker: Option<&'static str>,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            let head = read_head(&mut stream);
            match fail_marker {
                Some(marker) if head.contains(marker) => {
                    respond(&mut stream, "500 Internal Server Error", "")
                }
                _ => respond(&mut stream, "200 OK", body),
            }
        }
    });

    (addr, hits)
}

/// Drop the first `failures` connections without a response (the client
/// sees a reset/closed connection), then serve `body` normally. Accepts at
/// most `max_conns` connections so the thread always terminates.
pub fn spawn_flaky_stub(
    failures: usize,
    body: &'static str,
    max_conns: usize,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    thread::spawn(move || {
        for i in 0..max_conns {
            let Ok((mut stream, _)) = listener.accept() else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            if i < failures {
                continue; // connection cut before any response byte
            }
            let _ = read_head(&mut stream);
            respond(&mut stream, "200 OK", body);
        }
    });

    (addr, hits)
}

fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let resp = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(resp.as_bytes());
}
