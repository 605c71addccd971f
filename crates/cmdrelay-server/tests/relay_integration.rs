#![cfg(unix)]
#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the listener and relay sessions.
//!
//! Every test binds a listener on an ephemeral loopback port and drives it
//! with real TCP clients against real `cat`/`sh` subprocesses.

use std::net::SocketAddr;
use std::time::Duration;

use cmdrelay_core::{ReplacementRule, ReplacementTable};
use cmdrelay_server::process::ProcessSpawner;
use cmdrelay_server::{Listener, Relay};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(10);

/// Start a listener for `command` and return its address.
async fn start(command: &[&str], rules: &[(&str, &str)]) -> SocketAddr {
    let spawner =
        ProcessSpawner::new(command.iter().map(ToString::to_string).collect()).unwrap();
    let table = ReplacementTable::new(
        rules
            .iter()
            .map(|(p, r)| ReplacementRule::new(*p, *r).unwrap())
            .collect(),
    );
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), Relay::new(spawner, table))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.serve());
    addr
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(DEADLINE, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

async fn read_until_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    timeout(DEADLINE, stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

// =========================================================================
// Forwarding
// =========================================================================

#[tokio::test]
async fn cat_rewrites_foo_to_bar() {
    let addr = start(&["cat"], &[("foo", "bar")]).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"foo\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 4).await, b"bar\n");
}

#[tokio::test]
async fn cat_passthrough_preserves_bytes_and_order() {
    let addr = start(&["cat"], &[]).await;
    let client = TcpStream::connect(addr).await.unwrap();
    let (mut rx, mut tx) = client.into_split();

    // Every byte value, spread over many read-sized chunks.
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    // Read back while writing; half-closing first would end the session
    // before `cat` has echoed everything.
    let writer = tokio::spawn(async move {
        for chunk in payload.chunks(1000) {
            tx.write_all(chunk).await.unwrap();
        }
        tx
    });

    let mut received = vec![0u8; expected.len()];
    timeout(DEADLINE, rx.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, expected);

    let mut tx = writer.await.unwrap();
    tx.shutdown().await.unwrap();

    let mut rest = Vec::new();
    timeout(DEADLINE, rx.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn rules_apply_in_configured_order() {
    let addr = start(&["cat"], &[("a", "b"), ("b", "c")]).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"ab\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 3).await, b"cc\n");
}

#[tokio::test]
async fn stderr_is_relayed_with_stdout() {
    let addr = start(&["sh", "-c", "echo out; echo err 1>&2"], &[]).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    assert_eq!(read_until_eof(&mut client).await, b"out\nerr\n");
}

// =========================================================================
// Termination
// =========================================================================

#[tokio::test]
async fn process_exit_closes_connection() {
    let addr = start(&["sh", "-c", "echo ready on :8080"], &[(":8080", ":6000")]).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    assert_eq!(read_until_eof(&mut client).await, b"ready on :6000\n");
}

#[tokio::test]
async fn client_half_close_ends_session() {
    // `read` consumes one line, so the process would outlive the session if
    // the relay did not close the connection on network end-of-stream.
    let addr = start(&["sh", "-c", "read line; echo got $line; sleep 30"], &[]).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"hello\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"got hello\n");

    client.shutdown().await.unwrap();
    assert!(read_until_eof(&mut client).await.is_empty());
}

#[tokio::test]
async fn client_half_close_discards_pending_process_output() {
    // The process only speaks after the client has already half-closed.
    let addr = start(&["sh", "-c", "sleep 1; echo late"], &[]).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.shutdown().await.unwrap();
    assert!(read_until_eof(&mut client).await.is_empty());
}

#[tokio::test]
async fn spawn_failure_closes_connection() {
    let addr = start(&["/nonexistent/cmdrelay-test-binary"], &[]).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut buf = Vec::new();
    let n = timeout(DEADLINE, client.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}

// =========================================================================
// Session independence
// =========================================================================

#[tokio::test]
async fn sessions_do_not_share_data() {
    let addr = start(&["cat"], &[]).await;
    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();

    first.write_all(b"first\n").await.unwrap();
    second.write_all(b"second\n").await.unwrap();

    assert_eq!(read_exactly(&mut second, 7).await, b"second\n");
    assert_eq!(read_exactly(&mut first, 6).await, b"first\n");
}

#[tokio::test]
async fn closing_one_session_leaves_others_running() {
    let addr = start(&["cat"], &[]).await;
    let mut keep = TcpStream::connect(addr).await.unwrap();
    let mut close = TcpStream::connect(addr).await.unwrap();

    close.write_all(b"bye\n").await.unwrap();
    assert_eq!(read_exactly(&mut close, 4).await, b"bye\n");
    drop(close);

    keep.write_all(b"still here\n").await.unwrap();
    assert_eq!(read_exactly(&mut keep, 11).await, b"still here\n");
}

#[tokio::test]
async fn listeners_with_different_tables_are_independent() {
    let upper = start(&["cat"], &[("x", "X")]).await;
    let plain = start(&["cat"], &[]).await;

    let mut a = TcpStream::connect(upper).await.unwrap();
    let mut b = TcpStream::connect(plain).await.unwrap();

    a.write_all(b"xx\n").await.unwrap();
    b.write_all(b"xx\n").await.unwrap();

    assert_eq!(read_exactly(&mut a, 3).await, b"XX\n");
    assert_eq!(read_exactly(&mut b, 3).await, b"xx\n");
}
