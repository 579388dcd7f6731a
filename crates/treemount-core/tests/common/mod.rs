//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Once};
use std::thread;

use treemount_core::{BuildContext, Dispatcher, MonitorState, NodeSpec};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build context with an isolated monitor state.
pub fn context() -> BuildContext {
    init_tracing();
    BuildContext::default().with_monitor(Arc::new(MonitorState::new()))
}

pub fn dispatcher_from_json(json: &str) -> Dispatcher {
    let spec = NodeSpec::from_json_str(json).expect("valid spec document");
    Dispatcher::from_spec(&spec, &context()).expect("tree builds")
}

/// Opens `path`, reads it to the end with small sequential reads, closes it.
pub fn read_all(fs: &mut Dispatcher, path: &str) -> Vec<u8> {
    let fh = fs.open(path, libc::O_RDONLY).expect("open");
    let mut out = Vec::new();
    loop {
        let chunk = fs.read(path, 5, out.len() as u64, fh).expect("read");
        if chunk.is_empty() {
            break;
        }
        out.extend(chunk);
    }
    fs.release(path, fh).expect("release");
    out
}

/// Serves one canned HTTP/1.1 response per connection, for `connections`
/// connections, and returns the URL to request.
pub fn serve_http(status: &'static str, body: &'static [u8], connections: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            let Ok(mut stream) = stream else { continue };
            let Ok(clone) = stream.try_clone() else { continue };
            let mut reader = BufReader::new(clone);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let _ = write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(body);
        }
    });
    format!("http://{addr}/object")
}
