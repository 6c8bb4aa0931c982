// Integration tests for the mail server over real TCP connections


use mailspool::mailserver::*;
use std::time::Duration;
use test_utils::*;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_full_mail_exchange() {
    let server = start_server().await;

    // Nothing but LOGIN works before authenticating
    let mut alice = server.client().await;
    assert_eq!(
        alice.request(&["SEND", "bob", "subj", "hello"]).await.unwrap(),
        "ERR\n"
    );
    assert_eq!(alice.request(&["LIST"]).await.unwrap(), "ERR\n");

    assert!(alice.login("alice", "correctpw").await.unwrap());
    assert_eq!(
        alice.request(&["SEND", "bob", "subj", "hello"]).await.unwrap(),
        "OK\n"
    );
    alice.quit().await.unwrap();

    let mut bob = server.login("bob", "bobpw").await;
    assert_eq!(bob.request(&["LIST"]).await.unwrap(), "1\nsubj\n");
    assert_eq!(
        bob.request(&["READ", "1"]).await.unwrap(),
        "OK\nalice\nbob\nsubj\n\nhello\n"
    );
    assert_eq!(bob.request(&["DEL", "1"]).await.unwrap(), "OK\n");
    assert_eq!(bob.request(&["LIST"]).await.unwrap(), "0\n");
    assert_eq!(bob.request(&["READ", "1"]).await.unwrap(), "ERR\n");
    assert_eq!(bob.request(&["DEL", "1"]).await.unwrap(), "ERR\n");

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mailbox_is_private() {
    let server = start_server().await;

    let mut alice = server.login("alice", "correctpw").await;
    assert!(alice.send("bob", "for bob", "secret").await.unwrap());

    // Alice cannot see, read or delete what she sent to bob
    assert_eq!(alice.list().await.unwrap(), Some(vec![]));
    assert_eq!(alice.read(1).await.unwrap(), None);
    assert!(!alice.delete(1).await.unwrap());

    let mut bob = server.login("bob", "bobpw").await;
    assert_eq!(bob.list().await.unwrap(), Some(vec!["for bob".to_string()]));
}

#[tokio::test]
async fn test_multiline_body_and_ids() {
    let server = start_server().await;

    let mut alice = server.login("alice", "correctpw").await;
    assert!(alice.send("bob", "first", "line one\nline two").await.unwrap());
    assert!(alice.send("bob", "second", "").await.unwrap());
    assert!(alice.send("bob", "third", "x").await.unwrap());

    let mut bob = server.login("bob", "bobpw").await;
    assert_eq!(
        bob.read(1).await.unwrap().as_deref(),
        Some("alice\nbob\nfirst\n\nline one\nline two\n")
    );
    assert_eq!(
        bob.read(2).await.unwrap().as_deref(),
        Some("alice\nbob\nsecond\n\n")
    );

    // Deleting the highest ID frees it; deleting a lower one does not
    assert!(bob.delete(3).await.unwrap());
    assert!(bob.delete(1).await.unwrap());
    assert!(alice.send("bob", "fourth", "y").await.unwrap());

    assert_eq!(
        bob.list().await.unwrap(),
        Some(vec!["second".to_string(), "fourth".to_string()])
    );
    assert_eq!(
        bob.read(3).await.unwrap().as_deref(),
        Some("alice\nbob\nfourth\n\ny\n")
    );
}

#[tokio::test]
async fn test_trailing_newline_in_body_is_not_doubled() {
    let server = start_server().await;

    let mut alice = server.login("alice", "correctpw").await;
    assert!(alice.send("bob", "subj", "hello\n").await.unwrap());
    assert!(alice.send("bob", "two", "a\nb\n").await.unwrap());

    let mut bob = server.login("bob", "bobpw").await;
    assert_eq!(
        bob.read(1).await.unwrap().as_deref(),
        Some("alice\nbob\nsubj\n\nhello\n")
    );
    assert_eq!(
        bob.read(2).await.unwrap().as_deref(),
        Some("alice\nbob\ntwo\n\na\nb\n")
    );
}

#[tokio::test]
async fn test_concurrent_senders_get_unique_ids() {
    let server = start_server().await;

    let senders = (0..8).map(|n| {
        let addr = server.addr();
        async move {
            let mut client = MailClient::connect(addr).await.unwrap();
            assert!(client.login("alice", "correctpw").await.unwrap());
            for i in 0..5 {
                let subject = format!("msg-{}-{}", n, i);
                assert!(client.send("bob", &subject, "body").await.unwrap());
            }
            client.quit().await.unwrap();
        }
    });
    futures::future::join_all(senders).await;

    let mut bob = server.login("bob", "bobpw").await;
    let mut subjects = bob.list().await.unwrap().unwrap();
    assert_eq!(subjects.len(), 40);
    subjects.sort();
    subjects.dedup();
    assert_eq!(subjects.len(), 40);

    let mut ids: Vec<u64> = std::fs::read_dir(server.spool_dir().join("bob"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .filter_map(|name| name.strip_suffix(".txt").and_then(|id| id.parse().ok()))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=40).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_blacklist_after_repeated_failures() {
    let server = start_server().await;
    let mut client = server.client().await;

    for _ in 0..3 {
        assert!(!client.login("alice", "wrong").await.unwrap());
    }

    // Correct credentials are refused while blacklisted, from any connection
    assert!(!client.login("alice", "correctpw").await.unwrap());
    let mut other = server.client().await;
    assert!(!other.login("bob", "bobpw").await.unwrap());

    let state = std::fs::read_to_string(server.guard_state()).unwrap();
    assert!(state.starts_with("127.0.0.1 "));

    // The block lifts once it has expired
    server.clock.advance(60);
    assert!(client.login("alice", "correctpw").await.unwrap());
    assert_eq!(client.request(&["LIST"]).await.unwrap(), "0\n");
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let server = start_server().await;
    let mut client = server.client().await;

    assert!(!client.login("alice", "wrong").await.unwrap());
    assert!(!client.login("alice", "wrong").await.unwrap());
    assert!(client.login("alice", "correctpw").await.unwrap());
    assert!(!client.login("alice", "wrong").await.unwrap());
    assert!(!client.login("alice", "wrong").await.unwrap());

    let mut other = server.client().await;
    assert!(other.login("alice", "correctpw").await.unwrap());
}

#[tokio::test]
async fn test_failed_login_keeps_previous_identity() {
    let server = start_server().await;
    let mut client = server.login("alice", "correctpw").await;

    assert!(!client.login("bob", "wrong").await.unwrap());
    assert!(client.send("bob", "still alice", "hi").await.unwrap());

    let mut bob = server.login("bob", "bobpw").await;
    assert_eq!(
        bob.read(1).await.unwrap().as_deref(),
        Some("alice\nbob\nstill alice\n\nhi\n")
    );
}

#[tokio::test]
async fn test_malformed_requests_get_err() {
    let server = start_server().await;
    let mut client = server.login("alice", "correctpw").await;

    assert_eq!(client.request(&["BOGUS"]).await.unwrap(), "ERR\n");
    assert_eq!(client.request(&["list"]).await.unwrap(), "ERR\n");
    assert_eq!(client.request(&["SEND", "bob"]).await.unwrap(), "ERR\n");
    assert_eq!(client.request(&["READ"]).await.unwrap(), "ERR\n");
    assert_eq!(client.request(&["READ", "abc"]).await.unwrap(), "ERR\n");
    assert_eq!(client.request(&["DEL", "0"]).await.unwrap(), "ERR\n");

    // The connection survives every one of them
    assert_eq!(client.request(&["LIST"]).await.unwrap(), "0\n");
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.addr()).await.unwrap();

    stream.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
    let reply = read_frame(&mut stream, MAX_FRAME_LEN).await.unwrap();
    assert_eq!(reply, b"ERR\n");

    // The server closes the connection afterwards
    assert!(read_frame(&mut stream, MAX_FRAME_LEN).await.is_err());
}

#[tokio::test]
async fn test_quit_closes_without_reply() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.addr()).await.unwrap();

    write_frame(&mut stream, b"QUIT").await.unwrap();
    assert!(read_frame(&mut stream, MAX_FRAME_LEN).await.is_err());
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let limits = ConnectionLimits {
        idle_timeout: Some(Duration::from_millis(200)),
        ..ConnectionLimits::default()
    };
    let server = start_server_with(limits).await;
    let mut stream = TcpStream::connect(server.addr()).await.unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        read_frame(&mut stream, MAX_FRAME_LEN),
    )
    .await
    .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_client_rejects_empty_request() {
    let server = start_server().await;
    let mut client = server.client().await;

    assert!(client.request_raw("").await.is_err());
    let too_big = "x".repeat(MAX_FRAME_LEN as usize + 1);
    assert!(client.request_raw(&too_big).await.is_err());
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = start_server().await;
    let addr = server.addr();
    server.handle.shutdown().await.unwrap();

    // The listener is dropped with the accept task
    assert!(TcpStream::connect(addr).await.is_err());
}
