// Graceful shutdown: close() drains in-flight sessions and refuses new ones.

use socklink::{Server, SocklinkError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            if let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        let _ = stream.write_all(&buf[..n]).await;
                    }
                });
            }
        }
    });

    addr
}

/// Complete handshake and request, do one echo round-trip, leave the tunnel open.
async fn open_relaying_session(server_addr: SocketAddr, echo: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(server_addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    client.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);

    let ip = match echo.ip() {
        std::net::IpAddr::V4(v4) => v4.octets(),
        _ => unreachable!(),
    };
    let mut frame = vec![0x05, 0x01, 0x00, 0x01];
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&echo.port().to_be_bytes());
    client.write_all(&frame).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    client.write_all(b"live").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"live");

    client
}

#[tokio::test]
async fn close_waits_for_active_sessions_and_refuses_new_ones() {
    let echo = spawn_echo_server().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new());

    let runner = server.clone();
    let run_task = tokio::spawn(async move { runner.run(listener).await });

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(open_relaying_session(server_addr, echo).await);
    }

    let closer = server.clone();
    let close_task = tokio::spawn(async move { closer.close().await });

    // The accept loop must exit with the shutdown error.
    let run_result = tokio::time::timeout(Duration::from_secs(1), run_task)
        .await
        .expect("accept loop must stop once close begins")
        .unwrap();
    assert!(matches!(run_result, Err(SocklinkError::Closed)));

    // close() must not return while the three tunnels are still open.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!close_task.is_finished());

    // A fourth connection is not served any more.
    match TcpStream::connect(server_addr).await {
        Err(_) => {}
        Ok(mut late) => {
            late.write_all(&[0x05, 0x01, 0x00]).await.ok();
            let mut buf = [0u8; 2];
            assert!(late.read_exact(&mut buf).await.is_err());
        }
    }

    // Sessions still relay correctly while the server is draining.
    for client in clients.iter_mut() {
        client.write_all(b"draining").await.unwrap();
        let mut echoed = [0u8; 8];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"draining");
    }

    drop(clients);

    tokio::time::timeout(Duration::from_secs(1), close_task)
        .await
        .expect("close must return once every session has torn down")
        .unwrap()
        .unwrap();

    // Second close observes the already-closed state.
    assert!(matches!(server.close().await, Err(SocklinkError::Closed)));
}
