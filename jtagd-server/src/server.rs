use std::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex, MutexGuard},
    thread,
};

use jtagd_adapter::{Adapter, JtagInterface};
use jtagd_protocol::MAX_FRAME_LEN;

use crate::session::{Session, SessionError};
use crate::xvc;

#[derive(Debug, Clone)]
pub struct Config {
    /// Largest frame accepted from a client before the stream is declared
    /// corrupt.
    pub max_frame_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use jtagd_server::server::Builder;
///
/// let server = Builder::new()
///     .max_frame_len(1024 * 1024)
///     .build(my_adapter);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the largest frame this server will accept.
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.config.max_frame_len = len;
        self
    }

    /// Build and return the server
    pub fn build<A: Adapter + 'static>(self, adapter: A) -> Server<A> {
        Server::new(adapter, self.config)
    }
}

/// Serves one adapter to remote clients.
///
/// Each accepted connection runs on its own spawned thread; the adapter
/// lives behind a mutex so that exactly one session owns it at a time and
/// concurrent clients simply queue for it.
pub struct Server<A> {
    adapter: Arc<Mutex<A>>,
    config: Config,
}

impl<A: Adapter + 'static> Server<A> {
    pub fn new(adapter: A, config: Config) -> Server<A> {
        Server {
            adapter: Arc::new(Mutex::new(adapter)),
            config,
        }
    }

    /// Binds `addr` and serves framed-protocol clients forever.
    pub fn listen(&self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        self.serve(TcpListener::bind(addr)?)
    }

    /// Serves framed-protocol clients on an already-bound listener.
    pub fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("listening for protocol clients on {}", addr);
        }
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => self.spawn_connection(tcp, false),
                Err(e) => log::error!("accept failed: {}", e),
            }
        }
        Ok(())
    }

    /// Binds `addr` and serves Xilinx Virtual Cable clients forever.
    pub fn listen_xvc(&self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        self.serve_xvc(TcpListener::bind(addr)?)
    }

    /// Serves XVC clients on an already-bound listener.
    pub fn serve_xvc(&self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("listening for XVC clients on {}", addr);
        }
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => self.spawn_connection(tcp, true),
                Err(e) => log::error!("XVC accept failed: {}", e),
            }
        }
        Ok(())
    }

    /// One thread per client, spawned and forgotten. The thread takes the
    /// adapter lock for the whole session, which is what makes the adapter
    /// single-owner.
    fn spawn_connection(&self, tcp: TcpStream, is_xvc: bool) {
        if let Ok(peer) = tcp.peer_addr() {
            log::info!("client connected from {}", peer);
        }
        let adapter = Arc::clone(&self.adapter);
        let config = self.config.clone();

        thread::spawn(move || {
            let mut guard = lock_adapter(&adapter);
            let result = if is_xvc {
                xvc::handle_connection(tcp)
            } else {
                Session::new(&mut *guard, tcp, config.max_frame_len).run()
            };
            match result {
                Ok(()) => log::info!("client disconnected"),
                Err(SessionError::Io(e)) => log::debug!("session i/o error: {}", e),
                Err(SessionError::Adapter(e)) => log::warn!("session ended on adapter fault: {}", e),
                Err(e) => log::error!("session error: {}", e),
            }
            log_adapter_stats(&mut *guard);
        });
    }
}

fn lock_adapter<A>(adapter: &Mutex<A>) -> MutexGuard<'_, A> {
    match adapter.lock() {
        Ok(guard) => guard,
        // a panicked session doesn't make the adapter state less valid
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Logs the adapter's cumulative shift statistics, the way the daemon
/// reports per-session totals after each disconnect.
fn log_adapter_stats(adapter: &mut dyn Adapter) {
    let Some(jtag) = adapter.jtag() else {
        return;
    };
    let counts = (
        jtag.shift_op_count(),
        jtag.data_bit_count(),
        jtag.mode_bit_count(),
        jtag.dummy_clock_count(),
        jtag.recoverable_error_count(),
    );
    if let (Ok(shifts), Ok(data), Ok(mode), Ok(dummy), Ok(recovered)) = counts {
        log::info!(
            "adapter totals: {} shift ops, {} data bits, {} mode bits, {} dummy clocks, {} recovered errors",
            shifts,
            data,
            mode,
            dummy,
            recovered
        );
    }
}
