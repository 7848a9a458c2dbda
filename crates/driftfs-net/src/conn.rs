use std::net::SocketAddr;

use driftfs_proto::Wrapper;
use driftfs_types::NodeAddr;
use driftfs_wire::{from_bytes, to_bytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::NetError;

/// Size of the length prefix preceding every frame.
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Upper bound on a single frame. Chunks are a quarter MiB, so anything near
/// this limit is a corrupt prefix rather than a legitimate message.
pub const MAX_FRAME_SIZE: u64 = 512 * 1024 * 1024;

/// One framed, message-oriented connection.
///
/// The stream is split so sends and receives can run from different tasks;
/// each half is guarded by its own async mutex, and a whole frame is written
/// or read under one lock hold, so concurrent senders never interleave
/// partial frames.
pub struct MessageConn {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl MessageConn {
    /// Open a connection to `addr`.
    pub async fn connect(addr: &NodeAddr) -> Result<Self, NetError> {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
        Self::from_stream(stream)
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, NetError> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one message: 8-byte little-endian length prefix, then the
    /// encoded wrapper.
    pub async fn send(&self, message: &Wrapper) -> Result<(), NetError> {
        let payload = to_bytes(message);
        let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Receive one message. EOF on the prefix boundary reports
    /// [`NetError::ConnectionClosed`].
    pub async fn recv(&self) -> Result<Wrapper, NetError> {
        let mut reader = self.reader.lock().await;

        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        match reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetError::ConnectionClosed);
            }
            Err(e) => return Err(e.into()),
        }

        let size = u64::from_le_bytes(prefix);
        if size > MAX_FRAME_SIZE {
            return Err(NetError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut payload = vec![0u8; size as usize];
        reader.read_exact(&mut payload).await?;
        drop(reader);

        Ok(from_bytes::<Wrapper>(&payload)?)
    }

    /// Half-close the connection; the peer sees EOF on its next read.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for MessageConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageConn").field("peer", &self.peer).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftfs_proto::{Ack, ActionRequest, Chunk};
    use tokio::net::TcpListener;

    async fn conn_pair() -> (MessageConn, MessageConn) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            MessageConn::from_stream(stream).unwrap()
        });

        let client = MessageConn::connect(&NodeAddr::new("127.0.0.1", addr.port()))
            .await
            .unwrap();
        let server = accept.await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let (client, server) = conn_pair().await;

        let msg = Wrapper::ActionRequest(ActionRequest::get_file("/a/b.txt"));
        client.send(&msg).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), msg);

        let reply = Wrapper::Ack(Ack::failure("/a/b.txt doesn't exist"));
        server.send(&reply).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), reply);
    }

    #[tokio::test]
    async fn test_large_chunk_frame() {
        let (client, server) = conn_pair().await;

        let chunk = Chunk {
            file_name: "/big".into(),
            chunk_name: "/big-0".into(),
            data: vec![0xAB; 1 << 18],
            size: 1 << 18,
            file_size: 1 << 18,
            ..Default::default()
        };
        let msg = Wrapper::Chunk(chunk);

        let send = tokio::spawn(async move {
            client.send(&msg).await.unwrap();
            msg
        });
        let received = server.recv().await.unwrap();
        let sent = send.await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_order() {
        let (client, server) = conn_pair().await;

        for i in 0..5 {
            let msg = Wrapper::ActionRequest(ActionRequest::get_chunk(format!("/f-{i}")));
            client.send(&msg).await.unwrap();
        }
        for i in 0..5 {
            match server.recv().await.unwrap() {
                Wrapper::ActionRequest(req) => assert_eq!(req.chunk_name, format!("/f-{i}")),
                other => panic!("unexpected message {}", other.kind()),
            }
        }
    }

    #[tokio::test]
    async fn test_recv_after_shutdown_reports_closed() {
        let (client, server) = conn_pair().await;
        client.shutdown().await;

        let err = server.recv().await.unwrap_err();
        assert!(err.is_closed(), "got {err}");
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            MessageConn::from_stream(stream).unwrap()
        });

        // Raw socket writing a bogus length prefix.
        let mut raw = TcpStream::connect(addr).await.unwrap();
        let server = accept.await.unwrap();
        raw.write_all(&u64::MAX.to_le_bytes()).await.unwrap();

        let err = server.recv().await.unwrap_err();
        assert!(matches!(err, NetError::FrameTooLarge { .. }));
    }
}
