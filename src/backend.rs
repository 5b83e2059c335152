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
use crate::logging::Logger;
use std::net::Ipv4Addr;

/// One configured uplink (SOCKS mode: a local source IP) or forwarding target
/// (tunnel mode: a remote `host:port`).
///
/// A `Backend` is immutable once built; the only thing that changes over its
/// lifetime is the dispatch counter the [`crate::Dispatcher`] keeps alongside it,
/// which is why it isn't a field here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// SOCKS mode: the local bind endpoint `"<ipv4>:0"`. Tunnel mode: the remote
    /// target `"<host>:<port>"`.
    pub address: String,

    /// The OS interface name to pin the outbound socket to, e.g. `"eth0"`. Empty
    /// in tunnel mode, or when no matching local interface was found.
    pub interface: String,

    /// How many consecutive flows this backend is handed before the dispatcher
    /// advances to the next one. Always `>= 1`.
    pub contention_ratio: u32,
}

/// Splits a single backend spec of the form `addr` or `addr@weight` into its
/// address portion and weight. An absent or unparseable weight defaults to 1,
/// per the grammar: invalid weights are silently treated as 1 rather than
/// rejected.
fn split_spec(spec: &str) -> (&str, u32) {
    match spec.split_once('@') {
        Some((addr, weight_str)) => {
            let weight = weight_str.parse::<u32>().ok().filter(|w| *w > 0).unwrap_or(1);
            (addr, weight)
        },
        None => (spec, 1),
    }
}

/// Parses the caller-tokenized list of backend specs into [`Backend`] records.
///
/// In tunnel mode every spec becomes a target `Backend`; a spec that isn't a
/// valid `host:port` is dropped (and logged) rather than crashing startup. In
/// SOCKS mode every spec's address must be an IPv4 literal; non-IPv4 addresses
/// are silently skipped, matching the source's behavior (see the "likely source
/// bug" note in the design notes), though we do report the skip through the
/// logger since it may be masking a typo.
pub fn parse_backends(specs: &[String], tunnel_mode: bool, logger: &Logger) -> Vec<Backend> {
    let mut backends = Vec::with_capacity(specs.len());
    for spec in specs {
        let (addr, contention_ratio) = split_spec(spec);

        if tunnel_mode {
            match addr.rsplit_once(':') {
                Some((host, port)) if port.parse::<u16>().is_ok() => {
                    backends.push(Backend {
                        address: format!("{}:{}", host, port),
                        interface: String::new(),
                        contention_ratio,
                    });
                },
                _ => logger.warn(&format!("skipping malformed tunnel backend spec {:?}", spec)),
            }
        } else {
            match addr.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    let interface = interface_for_ip(ip).unwrap_or_default();
                    if interface.is_empty() {
                        logger.debug(&format!("no local interface matches backend address {}", ip));
                    }
                    backends.push(Backend { address: format!("{}:0", ip), interface, contention_ratio });
                },
                Err(_) => logger.warn(&format!(
                    "skipping backend spec {:?}: not an IPv4 literal (non-IPv4 addresses are unsupported in SOCKS mode)",
                    spec
                )),
            }
        }
    }
    backends
}

/// Scans the host's local, non-loopback interfaces for one whose address
/// matches `ip`, returning its name.
///
/// `get_if_addrs` doesn't expose interface up/down state (no `IFF_UP` flag),
/// so this can't filter on it; a down interface that retains a static address
/// would still match here. Narrow edge case -- a NIC used as a dispatch target
/// is expected to be up -- but worth knowing if a configured-but-unplugged
/// interface keeps getting selected.
fn interface_for_ip(ip: Ipv4Addr) -> Option<String> {
    let ifaces = get_if_addrs::get_if_addrs().ok()?;
    ifaces
        .into_iter()
        .find(|iface| !iface.is_loopback() && iface.ip() == std::net::IpAddr::V4(ip))
        .map(|iface| iface.name)
}
