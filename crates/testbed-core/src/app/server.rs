//! HTTP transport for [`Control`].
//!
//! # 実装
//! - tiny_http のサーバーを専用スレッドで回す（1 リクエストずつ処理）
//! - ハンドラは async なので、tokio の `Handle` に block_on させる
//! - ポートは設定値を試し、使えなければ 49152..=65535 から無作為に選ぶ（最大 50 回）
//! - `/quit` を受けたら応答してからループを抜け、`wait_quit` の待ち手を起こす

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use rand::Rng;
use tiny_http::{Header, Response, Server};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::control::Control;
use crate::error::HarnessError;

const RANDOM_PORTS: std::ops::RangeInclusive<u16> = 49152..=65535;
const PORT_ATTEMPTS: usize = 50;

pub struct ControlServer {
    port: u16,
    server: Arc<Server>,
    thread: Option<thread::JoinHandle<()>>,
    quit: watch::Receiver<bool>,
}

fn bind(preferred: u16) -> Result<TcpListener, HarnessError> {
    match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(listener) => return Ok(listener),
        Err(e) => debug!(port = preferred, error = %e, "preferred port unavailable"),
    }
    let mut rng = rand::thread_rng();
    for _ in 0..PORT_ATTEMPTS {
        let port = rng.gen_range(RANDOM_PORTS);
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            return Ok(listener);
        }
    }
    Err(HarnessError::Server(format!(
        "no free port after {PORT_ATTEMPTS} attempts (preferred {preferred})"
    )))
}

impl ControlServer {
    /// Binds and starts serving. `handle` runs the endpoint futures.
    pub fn start(control: Arc<Control>, handle: Handle, preferred_port: u16) -> Result<Self, HarnessError> {
        let listener = bind(preferred_port)?;
        let port = listener.local_addr()?.port();
        let server = Arc::new(Server::from_listener(listener, None).map_err(|e| HarnessError::Server(e.to_string()))?);
        let (quit_tx, quit) = watch::channel(false);

        let serving = Arc::clone(&server);
        let thread = thread::spawn(move || {
            for mut request in serving.incoming_requests() {
                let url = request.url().to_string();
                // リクエストボディは使わないが、読み捨てないと接続が詰まることがある
                let _ = std::io::copy(request.as_reader(), &mut std::io::sink());
                let reply = handle.block_on(control.handle(&url));

                let mut response = Response::from_string(reply.body).with_status_code(reply.status);
                if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
                    response = response.with_header(header);
                }
                if let Err(e) = request.respond(response) {
                    warn!(%url, error = %e, "could not send the response");
                }
                if reply.quit {
                    info!("quit requested");
                    break;
                }
            }
            quit_tx.send_replace(true);
        });

        info!(port, "control server listening");
        Ok(Self {
            port,
            server,
            thread: Some(thread),
            quit,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves once a client asked the server to quit (or it stopped).
    pub async fn wait_quit(&self) {
        let mut quit = self.quit.clone();
        // Err は送信側が消えた = スレッドが終わった
        let _ = quit.wait_for(|q| *q).await;
    }

    pub fn stop(mut self) {
        self.server.unblock();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("control server thread panicked");
            }
        }
    }
}
