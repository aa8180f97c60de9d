//! fibrio Echo Server
//!
//! TCP echo server with one fiber per connection. Sockets are
//! non-blocking; a fiber that would block registers interest with the
//! IoManager and yields until the descriptor is ready.
//!
//! Usage:
//!     cargo build --release -p fio-echo
//!     ./target/release/fio-echo [port]
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999
//!
//!     # Quick load (from another terminal):
//!     for i in $(seq 1 100); do echo "ping $i" | nc -q1 localhost 9999 & done
//!
//! # Environment Variables
//!
//! - `FIO_THREADS=4` - Worker threads
//! - `FIO_ECHO_PORT=9999` - Port when none is given on the command line

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};

use fibrio::{kdebug, kerror, kinfo, Event, Fiber, IoManager, SchedulerConfig};

const BUF_SIZE: usize = 4096;

static CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Park the calling fiber until `fd` is ready for `event`
fn wait_for(fd: RawFd, event: Event) -> io::Result<()> {
    let io = IoManager::current().ok_or_else(|| io::Error::other("not on an IoManager worker"))?;
    io.add_event(fd, event, None).map_err(io::Error::other)?;
    Fiber::yield_to_hold();
    Ok(())
}

fn write_all(stream: &mut TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => wait_for(stream.as_raw_fd(), Event::WRITE)?,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn serve(mut stream: TcpStream) -> io::Result<()> {
    let mut buf = [0u8; BUF_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => write_all(&mut stream, &buf[..n])?,
            Err(e) if e.kind() == ErrorKind::WouldBlock => wait_for(stream.as_raw_fd(), Event::READ)?,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn accept_loop(listener: TcpListener) {
    let fd = listener.as_raw_fd();
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    kerror!("set_nonblocking for {}: {}", peer, e);
                    continue;
                }
                let live = CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
                kdebug!("accepted {} ({} open)", peer, live);
                let Some(io) = IoManager::current() else {
                    kerror!("accept loop left its IoManager");
                    return;
                };
                io.schedule_fn(move || {
                    if let Err(e) = serve(stream) {
                        kdebug!("connection {} closed: {}", peer, e);
                    }
                    CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if let Err(e) = wait_for(fd, Event::READ) {
                    kerror!("listener wait failed: {}", e);
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                kerror!("accept failed: {}", e);
                return;
            }
        }
    }
}

fn main() {
    fibrio::init_logging();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or_else(|| fibrio::env_get("FIO_ECHO_PORT", 9999));

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("bind 0.0.0.0:{}: {}", port, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = listener.set_nonblocking(true) {
        eprintln!("set_nonblocking: {}", e);
        std::process::exit(1);
    }

    let config = SchedulerConfig::from_env().use_caller(false).name("echo");
    let io = match IoManager::new(config) {
        Ok(io) => io,
        Err(e) => {
            eprintln!("IoManager: {}", e);
            std::process::exit(1);
        }
    };

    println!("fio-echo listening on 0.0.0.0:{} with {} worker(s)", port, io.worker_count());
    kinfo!("echo server up on port {}", port);
    io.schedule_fn(move || accept_loop(listener));

    // Serves until the listener fails; a pending accept keeps stop() waiting
    io.stop();
}
