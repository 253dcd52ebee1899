// RTMP handshake
//
// Only the plain version-3 handshake is implemented: C0/C1 in, S0/S1/S2
// out, C2 read and discarded. The complex Adobe digest handshake (HMAC
// challenge/response embedded in the "random" payload) is not supported —
// encoders that demand it should fall back to the simple handshake, which
// every mainstream RTMP client and server still accepts.

use std::io;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HANDSHAKE_VERSION: u8 = 3;
const HANDSHAKE_SIZE: usize = 1536;

fn random_handshake_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    // time (4 bytes) left at zero, next 4 bytes are the required zero field
    rand::rng().fill_bytes(&mut packet[8..]);
    packet
}

/// Runs the server side of the handshake: reads C0+C1, writes S0+S1+S2,
/// reads C2. Does not validate the contents of C2 against S1, per the
/// simple handshake's own rules (only the version byte is checked).
pub async fn perform_server_handshake<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut c0 = [0u8; 1];
    stream.read_exact(&mut c0).await?;

    if c0[0] != HANDSHAKE_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported handshake version: {}", c0[0]),
        ));
    }

    let mut c1 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c1).await?;

    if c1[4..8] != [0, 0, 0, 0] {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "C1 has a nonzero version field: complex handshake is not supported",
        ));
    }

    let s1 = random_handshake_packet();

    stream.write_all(&[HANDSHAKE_VERSION]).await?;
    stream.write_all(&s1).await?;
    stream.write_all(&c1).await?; // S2 echoes C1 verbatim
    stream.flush().await?;

    let mut c2 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c2).await?;

    Ok(())
}

/// Runs the client side of the handshake. Exists for completeness and test
/// coverage of the wire format — this server never initiates a connection.
pub async fn perform_client_handshake<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let c1 = random_handshake_packet();

    stream.write_all(&[HANDSHAKE_VERSION]).await?;
    stream.write_all(&c1).await?;
    stream.flush().await?;

    let mut s0 = [0u8; 1];
    stream.read_exact(&mut s0).await?;

    let mut s1 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s1).await?;

    let mut s2 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s2).await?;

    stream.write_all(&s1).await?; // C2 echoes S1 verbatim
    stream.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_and_server_handshake_agree() {
        let (mut client, mut server) = duplex(1536 * 3 + 8);

        let server_task = tokio::spawn(async move { perform_server_handshake(&mut server).await });
        let client_task = tokio::spawn(async move { perform_client_handshake(&mut client).await });

        let (server_result, client_result) = tokio::join!(server_task, client_task);
        server_result.unwrap().unwrap();
        client_result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rejects_unsupported_version() {
        let (mut client, mut server) = duplex(16);
        let server_task = tokio::spawn(async move { perform_server_handshake(&mut server).await });

        client.write_all(&[6]).await.unwrap();
        drop(client);

        assert!(server_task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn rejects_c1_with_nonzero_version_field() {
        let (mut client, mut server) = duplex(HANDSHAKE_SIZE + 8);
        let server_task = tokio::spawn(async move { perform_server_handshake(&mut server).await });

        let mut c1 = random_handshake_packet();
        c1[4..8].copy_from_slice(&[1, 2, 3, 4]);

        client.write_all(&[HANDSHAKE_VERSION]).await.unwrap();
        client.write_all(&c1).await.unwrap();

        assert!(server_task.await.unwrap().is_err());
    }
}
