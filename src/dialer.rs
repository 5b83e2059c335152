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
use crate::backend::Backend;
use crate::dispatcher::Dispatcher;
use crate::errors::DialError;
use crate::logging::Logger;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};

/// How long a single connect attempt is given before it's treated as a failure.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens outbound TCP connections through whatever backend the dispatcher hands
/// out next, pinning each socket to that backend's local address and, on Linux,
/// its NIC.
pub struct Dialer {
    dispatcher: Arc<Dispatcher>,
}

impl Dialer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self { Dialer { dispatcher } }

    /// Selects the next backend via [`Dispatcher::next`] and dials `remote_addr`
    /// from its local address, within a 10-second timeout.
    ///
    /// The selected backend and its rotation index are returned alongside the
    /// connection, rather than leaving the caller to compare backends by
    /// identity, because the dispatcher may have already mutated its own state
    /// (and even advanced the rotation) by the time the caller gets around to
    /// logging which uplink was used.
    pub async fn dial(&self, remote_addr: &str, logger: &Logger) -> Result<(TcpStream, Backend, usize), DialError> {
        let (backend, idx) = self.dispatcher.next();
        let stream = self.connect_via(&backend, remote_addr, logger).await?;
        Ok((stream, backend, idx))
    }

    async fn connect_via(&self, backend: &Backend, remote_addr: &str, logger: &Logger) -> Result<TcpStream, DialError> {
        let local_addr: SocketAddr =
            backend.address.parse().map_err(|_| DialError::InvalidAddress(backend.address.clone()))?;

        let socket = match local_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|source| DialError::Io { addr: remote_addr.to_owned(), source })?;

        socket.set_reuseaddr(true).map_err(|source| DialError::Io { addr: remote_addr.to_owned(), source })?;
        socket.bind(local_addr).map_err(|source| DialError::Io { addr: remote_addr.to_owned(), source })?;

        bind_to_interface(&socket, &backend.interface, logger);

        let remote: SocketAddr = resolve_first(remote_addr).ok_or_else(|| DialError::InvalidAddress(remote_addr.to_owned()))?;

        match tokio::time::timeout(CONNECT_TIMEOUT, socket.connect(remote)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(DialError::Io { addr: remote_addr.to_owned(), source }),
            Err(_elapsed) => Err(DialError::Timeout(remote_addr.to_owned())),
        }
    }
}

/// Resolves `addr` (`host:port`) to its first socket address, delegating name
/// resolution to the platform resolver rather than doing anything DNS-specific
/// ourselves.
fn resolve_first(addr: &str) -> Option<SocketAddr> {
    use std::net::ToSocketAddrs;
    addr.to_socket_addrs().ok()?.next()
}

/// On Linux, pins `socket` to the named NIC via the kernel's bind-to-device
/// facility, so that packets egress that interface even when several NICs share
/// overlapping routes. This typically requires `CAP_NET_RAW` or root; a denial
/// is logged and otherwise ignored; dialing continues relying on the source
/// address binding alone.
///
/// On every other platform this is a no-op: `SO_BINDTODEVICE` has no portable
/// equivalent, so only the local-address bind above applies.
#[cfg(target_os = "linux")]
fn bind_to_interface(socket: &TcpSocket, interface: &str, logger: &Logger) {
    if interface.is_empty() {
        return;
    }

    let sock_ref = socket2::SockRef::from(socket);
    if let Err(e) = sock_ref.bind_device(Some(interface.as_bytes())) {
        logger.warn(&format!(
            "failed to bind outbound socket to interface {:?} ({}); relying on source address alone",
            interface, e
        ));
    }
}

#[cfg(not(target_os = "linux"))]
fn bind_to_interface(_socket: &TcpSocket, _interface: &str, _logger: &Logger) {}
