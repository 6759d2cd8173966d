//! Length-prefixed TCP framing and bind/connect helper functions.
//!
//! Every object is sent as a big-endian `u64` byte length followed by its
//! MessagePack encoding.

use std::marker::Unpin;
use std::net::SocketAddr;

use crate::utils::AtomRegError;

use bytes::{Bytes, BytesMut};

use serde::de::DeserializeOwned;
use serde::Serialize;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

/// Largest accepted object encoding in bytes.
pub(crate) const MAX_FRAME_LEN: u64 = 1 << 20;

/// Receives an object of type `T` from TCP readable connection `conn_read`,
/// using `read_buf` as buffer storage for partial reads. Returns:
///   - `Ok(obj)` if successful; upon returning, bytes of this object are
///     removed from the read buffer
///   - `Err(err)` if any unexpected error occurs, including peer EOF
///
/// CANCELLATION SAFETY: we cannot use `read_u64()` and `read_exact()` here
/// because this function is intended to be used as a `tokio::select!` branch
/// and that those two methods are not cancellation-safe. Instead, in the case
/// of being cancelled midway before receiving the entire object, bytes already
/// read are stored in the read buffer and will continue to be appended by
/// future invocations until successful returning.
pub(crate) async fn safe_tcp_read<T, Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<T, AtomRegError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    // read length of obj first
    if read_buf.capacity() < 8 {
        read_buf.reserve(8 - read_buf.capacity());
    }
    while read_buf.len() < 8 {
        // obj_len not wholesomely read from socket before last cancellation
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(AtomRegError::msg("connection closed by peer"));
        }
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&read_buf[..8]);
    let obj_len = u64::from_be_bytes(len_bytes);

    // then read the obj itself
    if obj_len > MAX_FRAME_LEN {
        return Err(AtomRegError::msg(format!("frame too large {}", obj_len)));
    }
    let obj_end = 8 + obj_len as usize;
    if read_buf.capacity() < obj_end {
        // capacity not big enough, reserve more space
        read_buf.reserve(obj_end - read_buf.capacity());
    }
    while read_buf.len() < obj_end {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(AtomRegError::msg("connection closed by peer"));
        }
    }
    let obj = decode_from_slice(&read_buf[8..obj_end])?;

    // if reached this point, no further cancellation to this call is
    // possible (because there are no more awaits ahead); discard bytes
    // used in this call
    if read_buf.len() > obj_end {
        let buf_tail = Bytes::copy_from_slice(&read_buf[obj_end..]);
        read_buf.clear();
        read_buf.extend_from_slice(&buf_tail);
    } else {
        read_buf.clear();
    }

    Ok(obj)
}

/// Sends an object of type `T` through TCP writable connection `conn_write`.
/// Not cancellation-safe: callers keep it out of `tokio::select!` branches
/// that may be dropped midway.
pub(crate) async fn tcp_write_obj<T, Conn>(
    obj: &T,
    conn_write: &mut Conn,
) -> Result<(), AtomRegError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    Ok(())
}

/// Wrapper over tokio `TcpListener` binding that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, AtomRegError> {
    loop {
        let socket = if bind_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;

        let attempt = socket.bind(bind_addr).and_then(|_| socket.listen(1024));
        match attempt {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

/// Wrapper over tokio `TcpStream::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, AtomRegError> {
    loop {
        match TcpStream::connect(conn_addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

#[cfg(test)]
mod safetcp_tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Frame {
        tag: u32,
        body: String,
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_in_order() -> Result<(), AtomRegError> {
        let listener =
            tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let mut stream = tcp_connect_with_retry(addr, 3).await?;
            for tag in 0..3 {
                let frame = Frame {
                    tag,
                    body: "x".repeat(tag as usize * 1000),
                };
                tcp_write_obj(&frame, &mut stream).await?;
            }
            Ok::<(), AtomRegError>(())
        });

        let (mut conn, _) = listener.accept().await?;
        let mut read_buf = BytesMut::with_capacity(8 + 64);
        for tag in 0..3 {
            let frame: Frame = safe_tcp_read(&mut read_buf, &mut conn).await?;
            assert_eq!(frame.tag, tag);
            assert_eq!(frame.body.len(), tag as usize * 1000);
        }
        // writer side dropped the stream after three frames
        assert!(safe_tcp_read::<Frame, _>(&mut read_buf, &mut conn)
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oversized_frame_rejected() -> Result<(), AtomRegError> {
        let listener =
            tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let mut stream = tcp_connect_with_retry(addr, 3).await?;
            stream.write_u64(u64::MAX / 2).await?;
            stream.write_all(&[0u8; 16]).await?;
            Ok::<(), AtomRegError>(())
        });

        let (mut conn, _) = listener.accept().await?;
        let mut read_buf = BytesMut::with_capacity(8 + 64);
        let result = safe_tcp_read::<Frame, _>(&mut read_buf, &mut conn).await;
        assert!(result.is_err());
        assert!(read_buf.capacity() < MAX_FRAME_LEN as usize);
        Ok(())
    }
}
