//! Live reload bridge.
//!
//! Browsers load a small script from the dev server which opens a WebSocket
//! to the bridge. Whenever [`ReloadBridge::signal`] is called, every open
//! socket receives a `"reload"` message.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tungstenite::WebSocket;

/// Path under which the dev server exposes the client script.
pub(crate) const SCRIPT_PATH: &str = "/__gantry/reload.js";

const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

pub struct ReloadBridge {
    port: u16,
    tx: Sender<()>,
    _threads: [JoinHandle<()>; 2],
}

impl ReloadBridge {
    /// Binds port 1337, or an ephemeral port if it is taken, and spawns the
    /// accept and broadcast threads.
    pub fn start() -> std::io::Result<Self> {
        let (tcp, port) = reserve_port()?;
        let clients = Clients::default();

        let incoming = new_thread_ws_incoming(tcp, clients.clone());
        let (tx, reload) = new_thread_ws_reload(clients);

        tracing::debug!(port, "reload bridge listening");

        Ok(Self {
            port,
            tx,
            _threads: [incoming, reload],
        })
    }

    /// Queues a reload. Signals sent while a broadcast is pending collapse
    /// into one.
    pub fn signal(&self) {
        if self.tx.send(()).is_err() {
            tracing::warn!("reload bridge is gone");
        }
    }

    /// JavaScript served to the browser.
    pub fn script(&self) -> String {
        format!(
            r#"(function () {{
  var socket = new WebSocket("ws://" + location.hostname + ":{}");
  socket.onmessage = function (event) {{
    if (event.data === "reload") location.reload();
  }};
}})();
"#,
            self.port
        )
    }
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else {
                continue;
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!("rejected reload client: {e}");
                    continue;
                }
            };

            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            clients.push(socket);
            trim(&mut clients);
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while wait_coalesced(&rx) {
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(_))
                    | Err(tungstenite::Error::ConnectionClosed)
                    | Err(tungstenite::Error::AlreadyClosed) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            tracing::info!(clients = clients.len(), "reloaded");
        }
    });

    (tx, thread)
}

/// Blocks for one signal, then drains any that queued up behind it.
/// Returns `false` once every sender is gone.
fn wait_coalesced(rx: &Receiver<()>) -> bool {
    if rx.recv().is_err() {
        return false;
    }
    while rx.try_recv().is_ok() {}
    true
}

/// Closes all but the last 10 connections.
fn trim<T: Closable>(clients: &mut Vec<T>) {
    let len = clients.len();
    if len > MAX_CLIENTS {
        for mut socket in clients.drain(0..len - MAX_CLIENTS) {
            socket.close();
        }
    }
}

trait Closable {
    fn close(&mut self);
}

impl Closable for WebSocket<TcpStream> {
    fn close(&mut self) {
        WebSocket::close(self, None).ok();
    }
}
