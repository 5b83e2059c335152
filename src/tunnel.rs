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
use crate::dialer::Dialer;
use crate::dispatcher::{Dispatcher, FailureBitmap};
use crate::logging::Logger;
use crate::relay;
use tokio::net::TcpStream;

/// Forwards one accepted client connection to a target backend, retrying
/// against the rotation on dial failure until one succeeds or every backend
/// has been tried.
///
/// Note that `dialer.dial` re-enters the dispatcher to pick a *source*
/// backend, independently of the *target* backend chosen here by
/// `next_avoiding` -- the two calls aren't coordinated, which is a faithfully
/// preserved quirk rather than a bug we introduced.
pub async fn handle(client: TcpStream, dispatcher: &Dispatcher, dialer: &Dialer, logger: &Logger) {
    let mut failed = FailureBitmap::new();

    loop {
        let (target, idx) = match dispatcher.next_avoiding(failed) {
            Some(picked) => picked,
            None => {
                logger.warn("all backends failed for this flow");
                return;
            },
        };

        match dialer.dial(&target.address, logger).await {
            Ok((remote, source_backend, source_idx)) => {
                logger.debug(&format!(
                    "tunnel -> {} (source {} LB:{})",
                    target.address, source_backend.address, source_idx
                ));
                relay::relay(client, remote).await;
                return;
            },
            Err(e) => {
                logger.warn(&format!("tunnel dial to {} failed: {}", target.address, e));
                failed.mark(idx);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn client_server_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (server_side, client_side) = tokio::join!(listener.accept(), connect);
        (client_side.unwrap(), server_side.unwrap().0)
    }

    #[tokio::test]
    async fn falls_over_to_a_working_backend() {
        // host1 and host2 refuse immediately (nothing bound there); host3 is a
        // live listener. Matches end-to-end scenario 4: failover in order,
        // relay established with the third target.
        let good = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good_addr = good.local_addr().unwrap().to_string();

        let targets = vec![
            Backend { address: "127.0.0.1:1".to_owned(), interface: String::new(), contention_ratio: 1 },
            Backend { address: "127.0.0.1:2".to_owned(), interface: String::new(), contention_ratio: 1 },
            Backend { address: good_addr, interface: String::new(), contention_ratio: 1 },
        ];
        let target_dispatcher = Dispatcher::new(targets).unwrap();

        let source_dispatcher = Arc::new(
            Dispatcher::new(vec![Backend {
                address: "127.0.0.1:0".to_owned(),
                interface: String::new(),
                contention_ratio: 1,
            }])
            .unwrap(),
        );
        let dialer = Dialer::new(source_dispatcher);
        let logger = Logger::noop();

        let (mut test_client, server_conn) = client_server_pair().await;
        let accept_task = tokio::spawn(async move { good.accept().await.unwrap().0 });

        let handler = tokio::spawn(async move {
            handle(server_conn, &target_dispatcher, &dialer, &logger).await;
        });

        let mut upstream = accept_task.await.unwrap();
        test_client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        test_client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(test_client);
        drop(upstream);
        handler.await.unwrap();
    }

    #[tokio::test]
    async fn closes_client_when_every_backend_fails() {
        let targets = vec![
            Backend { address: "127.0.0.1:1".to_owned(), interface: String::new(), contention_ratio: 1 },
            Backend { address: "127.0.0.1:2".to_owned(), interface: String::new(), contention_ratio: 1 },
        ];
        let target_dispatcher = Dispatcher::new(targets).unwrap();

        let source_dispatcher = Arc::new(
            Dispatcher::new(vec![Backend {
                address: "127.0.0.1:0".to_owned(),
                interface: String::new(),
                contention_ratio: 1,
            }])
            .unwrap(),
        );
        let dialer = Dialer::new(source_dispatcher);
        let logger = Logger::noop();

        let (mut test_client, server_conn) = client_server_pair().await;
        let handler = tokio::spawn(async move {
            handle(server_conn, &target_dispatcher, &dialer, &logger).await;
        });

        let mut buf = [0u8; 1];
        let n = test_client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        handler.await.unwrap();
    }
}
