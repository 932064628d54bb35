//! sockasync Echo Server
//!
//! TCP echo server driven entirely by completion callbacks: an accept loop
//! on the listener, and a receive → send → receive chain per connection.
//!
//! Usage:
//!     cargo build --release -p sockasync-echo
//!     ./target/release/sockasync-echo [addr]
//!
//! The address defaults to `SOCKASYNC_ECHO_ADDR`, then 127.0.0.1:7878.
//! Engine tuning comes from the `SOCKASYNC_*` environment variables.
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 7878

use sockasync::{Engine, EngineConfig, Socket, SocketError, TransferResult};
use sockasync_core::{env_get_opt, log_error, log_println, log_warn};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ADDR: &str = "127.0.0.1:7878";
const BUF_SIZE: usize = 4096;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

// ── Stats ──

#[derive(Default)]
struct Stats {
    accepts: AtomicU64,
    closes: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    errors: AtomicU64,
}

impl Stats {
    fn print(&self) {
        log_println!(
            "sockasync-echo: accepts={} closes={} in={}B out={}B errors={}",
            self.accepts.load(Ordering::Relaxed),
            self.closes.load(Ordering::Relaxed),
            self.bytes_in.load(Ordering::Relaxed),
            self.bytes_out.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        );
    }
}

struct Server {
    engine: Engine,
    listener: Socket,
    stats: Stats,
}

// ── Connection chain ──

fn start_receive(server: Arc<Server>, conn: Arc<Socket>) {
    // Once the pool stops, completions run inline on the submitting thread.
    if !RUNNING.load(Ordering::Relaxed) {
        finish(&server, &conn, None);
        return;
    }
    let s = Arc::clone(&server);
    let c = Arc::clone(&conn);
    conn.receive_async(
        vec![0u8; BUF_SIZE].into(),
        0,
        Box::new(move |r| on_received(s, c, r)),
    );
}

fn on_received(server: Arc<Server>, conn: Arc<Socket>, r: TransferResult) {
    if r.error != SocketError::Success {
        finish(&server, &conn, Some(r.error));
        return;
    }
    if r.bytes_transferred == 0 || !RUNNING.load(Ordering::Relaxed) {
        finish(&server, &conn, None);
        return;
    }
    server.stats.bytes_in.fetch_add(r.bytes_transferred as u64, Ordering::Relaxed);

    let mut data = r.buffer.into_single().into_inner();
    data.truncate(r.bytes_transferred);

    let s = Arc::clone(&server);
    let c = Arc::clone(&conn);
    conn.send_async(
        data.into(),
        0,
        Box::new(move |w| {
            if w.error != SocketError::Success {
                finish(&s, &c, Some(w.error));
                return;
            }
            s.stats.bytes_out.fetch_add(w.bytes_transferred as u64, Ordering::Relaxed);
            start_receive(s, c);
        }),
    );
}

fn finish(server: &Server, conn: &Socket, error: Option<SocketError>) {
    if let Some(e) = error {
        if e != SocketError::Shutdown {
            server.stats.errors.fetch_add(1, Ordering::Relaxed);
            log_warn!("sockasync-echo: fd {}: {}", conn.fd(), e);
        }
    }
    if conn.close().is_ok() {
        server.stats.closes.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Accept loop ──

fn start_accept(server: Arc<Server>) {
    let s = Arc::clone(&server);
    server.listener.accept_async(Box::new(move |r| {
        if r.error != SocketError::Success {
            if r.error != SocketError::Shutdown {
                s.stats.errors.fetch_add(1, Ordering::Relaxed);
                log_warn!("sockasync-echo: accept: {}", r.error);
                start_accept(s);
            }
            return;
        }

        match Socket::from_raw(s.engine.clone(), r.fd) {
            Ok(conn) => {
                s.stats.accepts.fetch_add(1, Ordering::Relaxed);
                start_receive(Arc::clone(&s), Arc::new(conn));
            }
            Err(e) => {
                s.stats.errors.fetch_add(1, Ordering::Relaxed);
                log_warn!("sockasync-echo: fd {}: {}", r.fd, e);
                unsafe { libc::close(r.fd) };
            }
        }
        start_accept(s);
    }));
}

fn main() {
    let addr_str = std::env::args()
        .nth(1)
        .or_else(|| env_get_opt("SOCKASYNC_ECHO_ADDR"))
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let addr: SocketAddr = match addr_str.parse() {
        Ok(a) => a,
        Err(e) => {
            log_error!("sockasync-echo: bad address {:?}: {}", addr_str, e);
            std::process::exit(2);
        }
    };

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_sigint as libc::sighandler_t);
    }

    let config = EngineConfig::from_env();
    if std::env::var_os("SOCKASYNC_DEBUG").is_some() {
        config.print();
    }
    let engine = match Engine::start(&config) {
        Ok(e) => e,
        Err(e) => {
            log_error!("sockasync-echo: engine: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match Socket::stream_for(engine.clone(), &addr) {
        Ok(s) => s,
        Err(e) => {
            log_error!("sockasync-echo: socket: {}", e);
            std::process::exit(1);
        }
    };
    let bound = listener
        .set_reuseaddr()
        .and_then(|_| listener.bind(&addr))
        .and_then(|_| listener.listen(1024))
        .and_then(|_| listener.local_addr());
    let local = match bound {
        Ok(a) => a,
        Err(e) => {
            log_error!("sockasync-echo: listen on {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let server = Arc::new(Server {
        engine: engine.clone(),
        listener,
        stats: Stats::default(),
    });
    log_println!("sockasync-echo: listening on {}", local);
    start_accept(Arc::clone(&server));

    while RUNNING.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    log_println!("\nsockasync-echo: shutting down...");
    if let Err(e) = server.listener.close() {
        log_warn!("sockasync-echo: listener close: {}", e);
    }
    engine.shutdown();
    server.stats.print();
    log_println!("sockasync-echo: done.");
}
