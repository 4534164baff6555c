// Stream coupler properties: joint teardown, byte accounting, first-error
// reporting.

use socklink::server::{ConnLinker, DefaultLinker, LinkTotals};
use socklink::SocklinkError;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Connected loopback pair; the first element is the accepted side.
async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    (accepted.unwrap().0, connected.unwrap())
}

#[tokio::test]
async fn joint_teardown_accounts_for_both_directions() {
    let (a_local, mut a_remote) = tcp_pair().await;
    let (b_local, mut b_remote) = tcp_pair().await;

    let link_task =
        tokio::spawn(async move { DefaultLinker::new().link(a_local, b_local).await });

    // a -> b
    a_remote.write_all(b"ping-01").await.unwrap();
    let mut buf = [0u8; 7];
    b_remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping-01");

    // b -> a
    b_remote.write_all(b"pong!").await.unwrap();
    let mut buf = [0u8; 5];
    a_remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong!");

    // Closing one far end finishes the relay and closes the other endpoint.
    drop(a_remote);

    let totals = link_task.await.unwrap().unwrap();
    assert_eq!(
        totals,
        LinkTotals {
            upload: 7,
            download: 5
        }
    );

    let mut buf = [0u8; 1];
    let n = b_remote.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "sibling endpoint must observe EOF after teardown");
}

#[tokio::test]
async fn clean_eof_is_not_an_error() {
    let (a_local, a_remote) = tcp_pair().await;
    let (b_local, b_remote) = tcp_pair().await;

    let link_task =
        tokio::spawn(async move { DefaultLinker::new().link(a_local, b_local).await });

    drop(a_remote);
    drop(b_remote);

    let totals = link_task.await.unwrap().unwrap();
    assert_eq!(totals, LinkTotals::default());
}

#[tokio::test]
async fn idle_timeout_reports_counters_with_the_error() {
    let (a_local, mut a_remote) = tcp_pair().await;
    let (b_local, mut b_remote) = tcp_pair().await;

    let linker = DefaultLinker::with_idle_timeout(Duration::from_millis(50));
    let link_task = tokio::spawn(async move { linker.link(a_local, b_local).await });

    a_remote.write_all(b"data").await.unwrap();
    let mut buf = [0u8; 4];
    b_remote.read_exact(&mut buf).await.unwrap();

    // Neither side sends anything further; the relay must time out.
    let err = link_task.await.unwrap().unwrap_err();
    match err {
        SocklinkError::Relay {
            upload,
            download,
            source,
        } => {
            assert_eq!(upload, 4);
            assert_eq!(download, 0);
            assert_eq!(source.kind(), ErrorKind::TimedOut);
        }
        other => panic!("expected relay error, got: {}", other),
    }

    // Teardown still closes both endpoints.
    let mut buf = [0u8; 1];
    let n = a_remote.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
    let n = b_remote.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn large_transfer_is_counted_exactly() {
    let (a_local, mut a_remote) = tcp_pair().await;
    let (b_local, mut b_remote) = tcp_pair().await;

    let link_task =
        tokio::spawn(async move { DefaultLinker::new().link(a_local, b_local).await });

    // Larger than one relay buffer so the copy loop runs multiple times.
    let payload = vec![0xA5u8; 96 * 1024];
    let expected = payload.len() as u64;

    let writer = tokio::spawn(async move {
        a_remote.write_all(&payload).await.unwrap();
        drop(a_remote);
    });

    let mut received = Vec::new();
    b_remote.read_to_end(&mut received).await.unwrap();
    assert_eq!(received.len() as u64, expected);

    writer.await.unwrap();
    let totals = link_task.await.unwrap().unwrap();
    assert_eq!(totals.upload, expected);
    assert_eq!(totals.download, 0);
}
