//! End-to-end client/server coverage over real TCP connections.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use recordwire::{
    ClientConfig, ClientError, ConnectionRegistry, Record, RecordClient, RecordHandler,
    RecordServer, ServerConfig, ServerError,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{sleep, timeout},
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(config: ServerConfig, handler: Option<RecordHandler>) -> Self {
        let mut server = RecordServer::new(config);
        if let Some(handler) = handler {
            server = server.handler(handler);
        }
        let server = server
            .bind_addr("127.0.0.1:0".parse().expect("loopback addr"))
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let registry = server.registry();
        let (stop, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .run_with_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });
        Self {
            addr,
            registry,
            stop,
            handle,
        }
    }

    async fn shut_down(self) {
        let _ = self.stop.send(());
        timeout(TEST_TIMEOUT, self.handle)
            .await
            .expect("server shutdown within timeout")
            .expect("join server task")
            .expect("server run");
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            addr: self.addr,
            ..ClientConfig::default()
        }
    }
}

async fn wait_until_empty(registry: &ConnectionRegistry) {
    timeout(TEST_TIMEOUT, async {
        while !registry.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry drains after disconnect");
}

#[tokio::test]
async fn server_callback_observes_the_exact_record() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
    let handler: RecordHandler = Arc::new(move |_, record: &str| {
        seen_tx.send(record.to_owned()).expect("record capture");
        Some(record.to_owned())
    });
    let server = TestServer::start(ServerConfig::default(), Some(handler)).await;

    let mut client = RecordClient::connect(server.client_config())
        .await
        .expect("connect");
    client
        .send("UserID:7 userName:Ann email:ann@x.com")
        .await
        .expect("send");

    let observed = timeout(TEST_TIMEOUT, seen_rx.recv())
        .await
        .expect("callback fires")
        .expect("channel open");
    assert_eq!(observed, "UserID:7 userName:Ann email:ann@x.com");

    // The payload convention survives the trip untouched.
    let record: Record = observed.parse().expect("conventional record");
    assert_eq!(record.user_id, 7);
    assert_eq!(record.user_name, "Ann");
    assert_eq!(record.email, "ann@x.com");

    let echoed = timeout(TEST_TIMEOUT, client.recv())
        .await
        .expect("echo arrives")
        .expect("recv");
    assert_eq!(echoed.as_deref(), Some("UserID:7 userName:Ann email:ann@x.com"));

    server.shut_down().await;
}

#[tokio::test]
async fn echo_replies_arrive_in_send_order() {
    let server = TestServer::start(ServerConfig::default(), None).await;
    let mut client = RecordClient::connect(server.client_config())
        .await
        .expect("connect");

    for i in 0..5 {
        client.send(&format!("record {i}")).await.expect("send");
    }
    for i in 0..5 {
        let echoed = timeout(TEST_TIMEOUT, client.recv())
            .await
            .expect("echo arrives")
            .expect("recv");
        assert_eq!(echoed, Some(format!("record {i}")));
    }

    server.shut_down().await;
}

#[tokio::test]
async fn empty_record_round_trips() {
    let server = TestServer::start(ServerConfig::default(), None).await;
    let mut client = RecordClient::connect(server.client_config())
        .await
        .expect("connect");

    client.send("").await.expect("send empty");
    let echoed = timeout(TEST_TIMEOUT, client.recv())
        .await
        .expect("echo arrives")
        .expect("recv");
    assert_eq!(echoed, Some(String::new()));

    server.shut_down().await;
}

#[tokio::test]
async fn oversized_frame_drops_only_the_offending_client() {
    let config = ServerConfig {
        max_payload: 1024,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None).await;

    let mut healthy = RecordClient::connect(server.client_config())
        .await
        .expect("connect healthy client");

    // A raw peer declaring a 2000-byte payload the server will not accept.
    let mut offender = TcpStream::connect(server.addr).await.expect("connect raw");
    offender
        .write_all(&[0x07, 0xD0])
        .await
        .expect("write oversize header");

    // The server rejects from the header alone and closes the connection.
    let mut buf = [0_u8; 16];
    let closed = timeout(TEST_TIMEOUT, offender.read(&mut buf))
        .await
        .expect("server closes offender");
    assert!(matches!(closed, Ok(0) | Err(_)));

    // The other connection is unaffected.
    healthy.send("still alive").await.expect("send");
    let echoed = timeout(TEST_TIMEOUT, healthy.recv())
        .await
        .expect("echo arrives")
        .expect("recv");
    assert_eq!(echoed.as_deref(), Some("still alive"));

    server.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_clients_never_cross_contaminate() {
    let server = TestServer::start(ServerConfig::default(), None).await;

    let run_client = |tag: &'static str, config: ClientConfig| async move {
        let mut client = RecordClient::connect(config).await.expect("connect");
        for i in 0..1000 {
            let record = format!("{tag} message {i}");
            client.send(&record).await.expect("send");
            let echoed = timeout(TEST_TIMEOUT, client.recv())
                .await
                .expect("echo arrives")
                .expect("recv")
                .expect("still connected");
            assert_eq!(echoed, record, "{tag} received a foreign or reordered echo");
        }
    };

    tokio::join!(
        run_client("alpha", server.client_config()),
        run_client("beta", server.client_config()),
    );

    server.shut_down().await;
}

#[tokio::test]
async fn closing_mid_frame_is_a_clean_disconnect() {
    let server = TestServer::start(ServerConfig::default(), None).await;

    // Half a header, then gone.
    let mut partial = TcpStream::connect(server.addr).await.expect("connect raw");
    partial.write_all(&[0x00]).await.expect("write half header");
    drop(partial);

    wait_until_empty(&server.registry).await;

    // The server keeps serving.
    let mut client = RecordClient::connect(server.client_config())
        .await
        .expect("connect");
    client.send("after partial").await.expect("send");
    let echoed = timeout(TEST_TIMEOUT, client.recv())
        .await
        .expect("echo arrives")
        .expect("recv");
    assert_eq!(echoed.as_deref(), Some("after partial"));

    server.shut_down().await;
}

#[tokio::test]
async fn send_after_close_is_not_connected() {
    let server = TestServer::start(ServerConfig::default(), None).await;
    let mut client = RecordClient::connect(server.client_config())
        .await
        .expect("connect");

    client.close().await;
    assert!(!client.is_connected());
    assert!(matches!(
        client.send("too late").await,
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(client.recv().await, Ok(None)));

    server.shut_down().await;
}

#[tokio::test]
async fn connect_failure_surfaces_the_destination() {
    // Bind-then-drop to obtain a port with no listener behind it.
    let vacant = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    let addr = vacant.local_addr().expect("probe addr");
    drop(vacant);

    let config = ClientConfig {
        addr,
        ..ClientConfig::default()
    };
    match RecordClient::connect(config).await {
        Err(ClientError::Connect { addr: failed, .. }) => assert_eq!(failed, addr),
        other => panic!("expected connect error, got {other:?}"),
    }
}

#[tokio::test]
async fn client_aborts_on_oversized_inbound_frame() {
    let server = TestServer::start(ServerConfig::default(), None).await;

    // A client enforcing a stricter read limit than the server's echo.
    let config = ClientConfig {
        max_payload: 8,
        ..server.client_config()
    };
    let mut client = RecordClient::connect(config).await.expect("connect");
    client
        .send("longer than eight bytes")
        .await
        .expect("send within the server's limit");

    let err = timeout(TEST_TIMEOUT, client.recv())
        .await
        .expect("violation observed");
    assert!(matches!(err, Err(ClientError::Corrupt(_))));
    assert!(!client.is_connected());
    assert!(matches!(client.recv().await, Ok(None)));

    server.shut_down().await;
}

#[tokio::test]
async fn oversized_send_is_reported_to_the_caller() {
    let server = TestServer::start(ServerConfig::default(), None).await;
    let mut client = RecordClient::connect(server.client_config())
        .await
        .expect("connect");

    let oversized = "a".repeat(recordwire::MAX_RECORD_BYTES + 1);
    assert!(matches!(
        client.send(&oversized).await,
        Err(ClientError::Encode(_))
    ));

    // The failed send wrote nothing; the connection still works.
    client.send("short").await.expect("send");
    let echoed = timeout(TEST_TIMEOUT, client.recv())
        .await
        .expect("echo arrives")
        .expect("recv");
    assert_eq!(echoed.as_deref(), Some("short"));

    server.shut_down().await;
}
