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
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Bidirectional byte pump between `client` and `remote`.
///
/// Each direction is copied by its own task. When one direction's source hits
/// EOF, the destination is half-closed (`shutdown(SHUT_WR)`) so its peer sees
/// EOF while the reverse direction stays open -- this matters for protocols that
/// signal end-of-request by half-closing rather than dropping the connection.
///
/// The *first* direction to finish, for any reason, tears down the whole flow:
/// its sibling task is aborted rather than awaited, which drops its half of
/// each socket and closes both out from under the other direction. We don't
/// wait for the second direction to notice on its own.
pub async fn relay(client: TcpStream, remote: TcpStream) {
    let (mut client_rd, mut client_wr) = client.into_split();
    let (mut remote_rd, mut remote_wr) = remote.into_split();

    let mut to_remote = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut client_rd, &mut remote_wr).await;
        let _ = remote_wr.shutdown().await;
    });
    let mut to_client = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut remote_rd, &mut client_wr).await;
        let _ = client_wr.shutdown().await;
    });

    tokio::select! {
        _ = &mut to_remote => to_client.abort(),
        _ = &mut to_client => to_remote.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn relays_bytes_in_both_directions() {
        let (client_side, mut client_peer) = connected_pair().await;
        let (remote_side, mut remote_peer) = connected_pair().await;

        let relay_task = tokio::spawn(relay(client_side, remote_side));

        client_peer.write_all(b"hello upstream").await.unwrap();
        let mut buf = [0u8; 14];
        remote_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello upstream");

        remote_peer.write_all(b"hello downstream").await.unwrap();
        let mut buf = [0u8; 16];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello downstream");

        // Closing one peer ends the whole relay, and the other socket observes
        // its own peer going away.
        drop(client_peer);
        let mut buf = [0u8; 1];
        let _ = remote_peer.read(&mut buf).await;

        relay_task.await.unwrap();
    }

    #[tokio::test]
    async fn large_transfer_is_not_truncated() {
        let (client_side, mut client_peer) = connected_pair().await;
        let (remote_side, mut remote_peer) = connected_pair().await;

        let relay_task = tokio::spawn(relay(client_side, remote_side));

        let payload = vec![0xABu8; 4 * 1024 * 1024];
        let payload_clone = payload.clone();
        let sender = tokio::spawn(async move {
            client_peer.write_all(&payload_clone).await.unwrap();
            client_peer.shutdown().await.unwrap();
            client_peer
        });

        let mut received = Vec::with_capacity(payload.len());
        remote_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);

        sender.await.unwrap();
        relay_task.await.unwrap();
    }
}
