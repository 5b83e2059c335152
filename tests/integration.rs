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
//! End-to-end scenarios driven over real loopback sockets, exercising the
//! server lifecycle rather than individual modules in isolation.
use manifold::{Mode, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// End-to-end scenario 1: SOCKS CONNECT to an IPv4 destination.
#[tokio::test]
async fn socks_connect_to_ipv4_relays_both_directions() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();

    let server = Server::new();
    let port = free_port().await;
    server
        .start("127.0.0.1", port, Mode::Socks, &["127.0.0.1".to_owned()], manifold::Logger::noop())
        .await
        .unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let upstream_task = tokio::spawn(async move { upstream.accept().await.unwrap().0 });

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    let octets: Vec<u8> = upstream_addr.ip().to_string().split('.').map(|s| s.parse().unwrap()).collect();
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&octets);
    request.extend_from_slice(&upstream_addr.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[0..2], &[0x05, 0x00]);

    client.write_all(b"hello").await.unwrap();
    let mut upstream_conn = upstream_task.await.unwrap();
    let mut buf = [0u8; 5];
    upstream_conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    server.stop();
}

/// End-to-end scenario 3: weighted dispatch produces the documented sequence.
#[tokio::test]
async fn weighted_dispatch_matches_documented_sequence() {
    use manifold::Dispatcher;

    let backends = manifold::backend::parse_backends(
        &["10.0.0.1@2".to_owned(), "10.0.0.2@1".to_owned(), "10.0.0.3@3".to_owned()],
        false,
        &manifold::Logger::noop(),
    );
    let dispatcher = Dispatcher::new(backends).unwrap();
    let sequence: Vec<usize> = (0..12).map(|_| dispatcher.next().1).collect();
    assert_eq!(sequence, vec![0, 0, 1, 2, 2, 2, 0, 0, 1, 2, 2, 2]);
}

/// End-to-end scenario 4: tunnel mode fails over past dead backends.
#[tokio::test]
async fn tunnel_mode_fails_over_to_a_live_backend() {
    let dead_one = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_one_addr = dead_one.local_addr().unwrap().to_string();
    drop(dead_one); // bound then dropped: port refuses connections once closed.

    let dead_two = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_two_addr = dead_two.local_addr().unwrap().to_string();
    drop(dead_two);

    let alive = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let alive_addr = alive.local_addr().unwrap().to_string();

    let server = Server::new();
    let port = free_port().await;
    server
        .start("127.0.0.1", port, Mode::Tunnel, &[dead_one_addr, dead_two_addr, alive_addr], manifold::Logger::noop())
        .await
        .unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (mut upstream_conn, _) = alive.accept().await.unwrap();

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    upstream_conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    server.stop();
}

/// End-to-end scenario 5: an unsupported SOCKS command gets the formal reply
/// and the connection closes without ever dialing a backend.
#[tokio::test]
async fn unsupported_socks_command_replies_and_closes() {
    let server = Server::new();
    let port = free_port().await;
    server
        .start("127.0.0.1", port, Mode::Socks, &["127.0.0.1".to_owned()], manifold::Logger::noop())
        .await
        .unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();

    // BIND (0x02) instead of CONNECT.
    client.write_all(&[0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await.unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x07);

    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);

    server.stop();
}

/// End-to-end scenario 6: graceful stop drains an in-flight flow without
/// truncating it, and active connection count returns to zero.
#[tokio::test]
async fn graceful_stop_drains_in_flight_flow() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap().to_string();

    let server = Server::new();
    let port = free_port().await;
    server.start("127.0.0.1", port, Mode::Tunnel, &[upstream_addr], manifold::Logger::noop()).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (mut upstream_conn, _) = upstream.accept().await.unwrap();

    server.stop();
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

    let payload = vec![0x7Eu8; 256 * 1024];
    client.write_all(&payload).await.unwrap();
    client.shutdown().await.unwrap();

    let mut received = Vec::new();
    upstream_conn.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, payload);

    for _ in 0..50 {
        if server.active_conns() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(server.active_conns(), 0);
}
