//! One-shot HTTP file server used to hand the client profile to the operator

use crate::error::ProvisionError;
use anyhow::{Context, Result};
use axum::Router;
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use tracing::{debug, warn};

/// A running static file server. Dropping it stops the server too.
pub struct DeliveryServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<Result<()>>>,
}

/// Claim `0.0.0.0:port`. The port stays reserved for as long as the listener lives.
///
/// An occupied port fails with [`ProvisionError::PortInUse`].
pub fn reserve_port(port: u16) -> Result<TcpListener> {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(ProvisionError::PortInUse(port).into()),
        Err(e) => Err(e).with_context(|| format!("Failed to bind to port {}", port)),
    }
}

impl DeliveryServer {
    /// Serve `root` on an already reserved listener from a background thread
    pub fn serve(listener: TcpListener, root: &Path) -> Result<Self> {
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;
        let addr = listener.local_addr()?;

        let (tx, rx) = oneshot::channel::<()>();
        let app = Router::new().fallback_service(ServeDir::new(root));
        let worker = std::thread::Builder::new()
            .name("delivery".into())
            .spawn(move || -> Result<()> {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .enable_all()
                    .build()
                    .context("Failed to start delivery runtime")?;
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = rx.await;
                        })
                        .await?;
                    Ok::<(), anyhow::Error>(())
                })
            })
            .context("Failed to spawn delivery thread")?;

        debug!(%addr, root = %root.display(), "delivery server started");
        Ok(Self {
            addr,
            shutdown: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving and wait until the port is released
    pub fn stop(mut self) -> Result<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow::anyhow!("Delivery server thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for DeliveryServer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_and_join() {
            warn!(error = %e, "delivery server did not shut down cleanly");
        }
    }
}

pub fn download_url(host: &str, port: u16, file_name: &str) -> String {
    format!("http://{}:{}/{}", host, port, file_name)
}

/// Block until the operator presses a key (or enters a line when stdin is not a terminal)
pub fn wait_for_keypress(prompt: &str) -> Result<()> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let stdin = io::stdin();
    if !stdin.is_terminal() {
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        return Ok(());
    }

    use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, SpecialCharacterIndices};
    let original = tcgetattr(&stdin).context("Failed to read terminal mode")?;
    let mut raw = original.clone();
    raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    tcsetattr(&stdin, SetArg::TCSANOW, &raw).context("Failed to set terminal mode")?;

    let mut byte = [0u8; 1];
    let read = stdin.lock().read(&mut byte);
    tcsetattr(&stdin, SetArg::TCSANOW, &original).context("Failed to restore terminal mode")?;
    read.context("Failed to read from stdin")?;
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        TcpListener::bind(("0.0.0.0", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn test_occupied_port_is_refused() {
        let taken = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = reserve_port(port).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::PortInUse(p)) if *p == port
        ));
    }

    #[test]
    fn test_serves_files_and_releases_port() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("edge_Pass1234.ovpn"), "client\nproto tcp\n").unwrap();

        let port = free_port();
        let reserved = reserve_port(port).unwrap();
        assert!(TcpListener::bind(("0.0.0.0", port)).is_err());
        let server = DeliveryServer::serve(reserved, dir.path()).unwrap();
        assert_eq!(server.local_addr().port(), port);

        let url = download_url("127.0.0.1", port, "edge_Pass1234.ovpn");
        let body = reqwest::blocking::get(&url).unwrap().text().unwrap();
        assert_eq!(body, "client\nproto tcp\n");

        let missing = reqwest::blocking::get(download_url("127.0.0.1", port, "nope")).unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        server.stop().unwrap();
        TcpListener::bind(("0.0.0.0", port)).expect("port should be free after stop");
    }

    #[test]
    fn test_download_url() {
        assert_eq!(
            download_url("192.0.2.10", 8000, "edge_abc.ovpn"),
            "http://192.0.2.10:8000/edge_abc.ovpn"
        );
    }
}
