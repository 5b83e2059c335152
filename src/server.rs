// Copyright (c) 2024 Manifold contributors
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use crate::backend::parse_backends;
use crate::dialer::Dialer;
use crate::dispatcher::Dispatcher;
use crate::errors::CreationError;
use crate::logging::Logger;
use crate::{socks5, tunnel};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Which sub-protocol accepted connections are handled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Speak the SOCKS5 CONNECT handshake, then relay to the parsed destination.
    Socks,
    /// Forward straight to a configured target, with failover across backends.
    Tunnel,
}

struct Running {
    active_conns: Arc<AtomicUsize>,
    stop_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// Owns the listener and lifecycle of one proxy instance.
///
/// Unlike the process-wide singleton this is descended from, a `Server` is an
/// explicit value: nothing stops a caller (a test harness, in particular) from
/// constructing several in one process.
pub struct Server {
    running: Mutex<Option<Running>>,
}

impl Default for Server {
    fn default() -> Self { Server::new() }
}

impl Server {
    pub fn new() -> Self { Server { running: Mutex::new(None) } }

    /// Parses `backend_specs`, builds the dispatcher, binds `host:port`, and
    /// spawns the accept loop. Refuses to start if already running, if the
    /// backend list is empty after parsing, or if the listener can't be bound.
    pub async fn start(
        &self,
        host: &str,
        port: u16,
        mode: Mode,
        backend_specs: &[String],
        logger: Logger,
    ) -> Result<(), CreationError> {
        {
            let guard = self.running.lock().unwrap();
            if guard.is_some() {
                return Err(CreationError::AlreadyRunning);
            }
        }

        let logger = Arc::new(logger);
        let backends = parse_backends(backend_specs, mode == Mode::Tunnel, &logger);
        let dispatcher = Arc::new(Dispatcher::new(backends)?);
        let dialer = Arc::new(Dialer::new(dispatcher.clone()));

        let addr = format!("{}:{}", host, port);
        let listener =
            TcpListener::bind(&addr).await.map_err(|source| CreationError::Listen { addr: addr.clone(), source })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let active_conns = Arc::new(AtomicUsize::new(0));

        let accept_task =
            tokio::spawn(accept_loop(listener, mode, dispatcher, dialer, logger, active_conns.clone(), stop_rx));

        let mut guard = self.running.lock().unwrap();
        if guard.is_some() {
            accept_task.abort();
            return Err(CreationError::AlreadyRunning);
        }
        *guard = Some(Running { active_conns, stop_tx, accept_task });
        Ok(())
    }

    /// Stops accepting new connections. In-flight flows are left to drain on
    /// their own; use [`Server::active_conns`] to observe when they've all
    /// finished.
    pub fn stop(&self) {
        let mut guard = self.running.lock().unwrap();
        if let Some(running) = guard.take() {
            let _ = running.stop_tx.send(());
            running.accept_task.abort();
        }
    }

    pub fn is_running(&self) -> bool { self.running.lock().unwrap().is_some() }

    pub fn active_conns(&self) -> usize {
        self.running.lock().unwrap().as_ref().map(|r| r.active_conns.load(Ordering::SeqCst)).unwrap_or(0)
    }
}

async fn accept_loop(
    listener: TcpListener,
    mode: Mode,
    dispatcher: Arc<Dispatcher>,
    dialer: Arc<Dialer>,
    logger: Arc<Logger>,
    active_conns: Arc<AtomicUsize>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                return;
            },
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _peer)) => {
                        active_conns.fetch_add(1, Ordering::SeqCst);
                        let dispatcher = dispatcher.clone();
                        let dialer = dialer.clone();
                        let logger = logger.clone();
                        let active_conns = active_conns.clone();
                        tokio::spawn(async move {
                            dispatch_one(stream, mode, &dispatcher, &dialer, &logger).await;
                            active_conns.fetch_sub(1, Ordering::SeqCst);
                        });
                    },
                    Err(e) => {
                        logger.warn(&format!("accept failed: {}", e));
                    },
                }
            },
        }
    }
}

async fn dispatch_one(stream: TcpStream, mode: Mode, dispatcher: &Dispatcher, dialer: &Dialer, logger: &Logger) {
    match mode {
        Mode::Socks => socks5::handle(stream, dialer, logger).await,
        Mode::Tunnel => tunnel::handle(stream, dispatcher, dialer, logger).await,
    }
}
