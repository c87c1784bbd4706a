//! Admission control over real sockets.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

use auth_server::auth::Privilege;
use auth_server::protocol::Status;

mod common;

async fn read_line_within(stream: &mut TcpStream, limit: Duration) -> Option<String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match tokio::time::timeout(limit, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => Some(line),
        _ => None,
    }
}

#[tokio::test]
async fn client_over_the_limit_gets_capacity_error() {
    let server = common::start_server(2).await;

    let first = TcpStream::connect(server.addr).await.unwrap();
    let second = TcpStream::connect(server.addr).await.unwrap();
    common::wait_for(|| server.active() == 2).await;

    let mut third = TcpStream::connect(server.addr).await.unwrap();
    let line = read_line_within(&mut third, Duration::from_secs(5))
        .await
        .expect("rejected client got no response");
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["status"], "SERVER_CAPACITY_ERROR");
    assert!(response["account"].is_null());
    assert_eq!(server.active(), 2);

    drop(first);
    common::wait_for(|| server.active() == 1).await;

    let response = server
        .client()
        .sign_up(&common::sign_up_input("late@x.com", Privilege::User))
        .await
        .unwrap();
    assert_eq!(response.status, Status::Ok);

    drop(second);
    server.stop().await;
}

#[tokio::test]
async fn burst_admits_exactly_the_limit() {
    let server = common::start_server(3).await;

    let mut streams = Vec::new();
    for _ in 0..10 {
        streams.push(TcpStream::connect(server.addr).await.unwrap());
    }

    let mut rejected = 0;
    for stream in &mut streams {
        if let Some(line) = read_line_within(stream, Duration::from_millis(500)).await {
            assert!(line.contains("SERVER_CAPACITY_ERROR"), "{}", line);
            rejected += 1;
        }
    }

    assert_eq!(rejected, 7);
    assert_eq!(server.active(), 3);

    drop(streams);
    common::wait_for(|| server.active() == 0).await;
    server.stop().await;
}

#[tokio::test]
async fn finished_workers_free_their_slot() {
    let server = common::start_server(1).await;
    let client = server.client();

    for _ in 0..5 {
        let response = client
            .sign_in(&common::credential("nobody@x.com", "nope"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::CredentialError);
        common::wait_for(|| server.active() == 0).await;
    }

    server.stop().await;
}
