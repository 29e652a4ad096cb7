//! Server tests
//!
//! End-to-end over loopback for every concurrency policy:
//! - UDP request/reply
//! - TCP request/reply with both framings
//! - Malformed packets and failing handlers leave the server running
//! - Scheduled bundles wait for their timestamp
//! - Handlers see the sender's address

use oscine_core::{Atom, Bundle, Message, Packet, Timestamp};
use oscine_server::{
    DispatchClient, Dispatcher, HandlerErrorPolicy, Policy, Server, ServerConfig,
};
use oscine_transport::{
    Framing, TcpClient, TcpConfig, TcpServer, TransportServer, UdpClient, UdpTransport,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

fn echo_dispatcher() -> Arc<Dispatcher> {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher
        .map(
            "/echo",
            |_: &str, _: &[Atom], args: &[Atom]| Ok(Some(Message::new("/echo/reply", args.to_vec())?)),
            vec![],
        )
        .unwrap();
    dispatcher
        .map(
            "/fail",
            |_: &str, _: &[Atom], _: &[Atom]| Err(anyhow::anyhow!("handler refused")),
            vec![],
        )
        .unwrap();
    dispatcher
        .map("/panic", |_: &str, _: &[Atom], _: &[Atom]| panic!("handler exploded"), vec![])
        .unwrap();
    dispatcher
        .map_with_peer(
            "/whoami",
            |peer: Option<SocketAddr>, _: &str, _: &[Atom], _: &[Atom]| {
                let port = peer.map(|p| p.port() as i32).unwrap_or(-1);
                Ok(Some(Message::new("/whoami/reply", vec![Atom::Int(port)])?))
            },
            vec![],
        )
        .unwrap();
    dispatcher
}

async fn start_udp(config: ServerConfig) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
    start_udp_with(echo_dispatcher(), config).await
}

async fn start_udp_with(
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
    let server = Arc::new(Server::new(dispatcher, config).unwrap());
    let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();

    let task = {
        let server = server.clone();
        tokio::spawn(async move {
            server.serve_datagrams(transport).await.unwrap();
        })
    };
    (server, addr, task)
}

async fn start_tcp(config: ServerConfig) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
    let tcp = config.tcp.clone();
    let server = Arc::new(Server::new(echo_dispatcher(), config).unwrap());
    let listener = TcpServer::bind_with_config("127.0.0.1:0", tcp).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = {
        let server = server.clone();
        tokio::spawn(async move {
            server.serve_stream(listener).await.unwrap();
        })
    };
    (server, addr, task)
}

fn policy_config(policy: Policy) -> ServerConfig {
    ServerConfig {
        policy,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_udp_echo_every_policy() {
    for policy in Policy::ALL {
        let (server, addr, task) = start_udp(policy_config(policy)).await;
        assert_eq!(server.policy(), policy);

        let client = UdpClient::connect(&addr.to_string()).await.unwrap();
        client
            .send_message("/echo", vec![Atom::Int(42), Atom::from("hi")])
            .await
            .unwrap();

        let reply = client
            .recv(REPLY_TIMEOUT)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no reply under {policy}"));
        let reply = reply.as_message().unwrap();
        assert_eq!(reply.address(), "/echo/reply");
        assert_eq!(reply.args(), &[Atom::Int(42), Atom::from("hi")]);

        server.shutdown().await;
        task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_echo_every_policy_and_framing() {
    for framing in [Framing::LengthPrefixed, Framing::Slip] {
        for policy in Policy::ALL {
            let tcp = TcpConfig {
                framing,
                ..Default::default()
            };
            let config = ServerConfig {
                policy,
                tcp: tcp.clone(),
                ..Default::default()
            };
            let (server, addr, task) = start_tcp(config).await;

            let mut client = TcpClient::connect_with_config(&addr.to_string(), tcp)
                .await
                .unwrap();
            // 0xC0 and 0xDB exercise SLIP escaping
            let blob = vec![0xC0, 0xDB, 0x00, 0x01];
            client
                .send_message("/echo", vec![Atom::Blob(blob.clone()), Atom::Float(0.25)])
                .await
                .unwrap();

            let reply = client
                .recv_timeout(REPLY_TIMEOUT)
                .await
                .unwrap()
                .unwrap_or_else(|| panic!("no reply under {policy} / {framing:?}"));
            assert_eq!(
                reply.as_message().unwrap().args(),
                &[Atom::Blob(blob), Atom::Float(0.25)]
            );

            client.close().await.unwrap();
            server.shutdown().await;
            task.await.unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_input_keeps_server_alive() {
    for policy in Policy::ALL {
        let (server, addr, task) = start_udp(policy_config(policy)).await;
        let client = UdpClient::connect(&addr.to_string()).await.unwrap();

        // raw garbage, a failing handler, a panicking handler
        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"#bundle\0\x00", addr).await.unwrap();
        raw.send_to(b"not osc", addr).await.unwrap();
        client.send_message("/fail", vec![]).await.unwrap();
        client.send_message("/panic", vec![]).await.unwrap();

        client.send_message("/echo", vec![Atom::Int(1)]).await.unwrap();
        let reply = client.recv(REPLY_TIMEOUT).await.unwrap();
        assert!(reply.is_some(), "server stopped answering under {policy}");

        server.shutdown().await;
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_abort_packet_suppresses_replies() {
    let config = ServerConfig {
        on_handler_error: HandlerErrorPolicy::AbortPacket,
        ..Default::default()
    };
    let (server, addr, task) = start_udp(config).await;
    let client = UdpClient::connect(&addr.to_string()).await.unwrap();

    let bundle = Bundle::builder(Timestamp::IMMEDIATE)
        .message(Message::new("/echo", vec![Atom::Int(1)]).unwrap())
        .message(Message::new("/fail", vec![]).unwrap())
        .build();
    client.send(&Packet::Bundle(bundle)).await.unwrap();
    assert!(client
        .recv(Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());

    // the next packet is unaffected
    client.send_message("/echo", vec![Atom::Int(2)]).await.unwrap();
    assert!(client.recv(REPLY_TIMEOUT).await.unwrap().is_some());

    server.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_replies_can_be_disabled() {
    let config = ServerConfig {
        send_replies: false,
        ..Default::default()
    };
    let (server, addr, task) = start_udp(config).await;
    let client = UdpClient::connect(&addr.to_string()).await.unwrap();

    client.send_message("/echo", vec![Atom::Int(1)]).await.unwrap();
    assert!(client
        .recv(Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());

    server.shutdown().await;
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_bundle_waits_for_timestamp() {
    let config = ServerConfig {
        policy: Policy::Worker,
        schedule_bundles: true,
        ..Default::default()
    };
    let (server, addr, task) = start_udp(config).await;
    let client = UdpClient::connect(&addr.to_string()).await.unwrap();

    let due = Timestamp::from_system_time(SystemTime::now() + Duration::from_millis(300));
    let bundle = Bundle::builder(due)
        .message(Message::new("/echo", vec![Atom::from("later")]).unwrap())
        .build();

    let sent = Instant::now();
    client.send(&Packet::Bundle(bundle)).await.unwrap();
    let reply = client.recv(REPLY_TIMEOUT).await.unwrap();
    assert!(reply.is_some());
    assert!(sent.elapsed() >= Duration::from_millis(250));

    server.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_immediate_bundle_is_not_delayed() {
    let config = ServerConfig {
        schedule_bundles: true,
        ..Default::default()
    };
    let (server, addr, task) = start_udp(config).await;
    let client = UdpClient::connect(&addr.to_string()).await.unwrap();

    let bundle = Bundle::builder(Timestamp::IMMEDIATE)
        .message(Message::new("/echo", vec![Atom::Int(1)]).unwrap())
        .message(Message::new("/echo", vec![Atom::Int(2)]).unwrap())
        .build();
    client.send(&Packet::Bundle(bundle)).await.unwrap();

    for expected in [1, 2] {
        let reply = client.recv(REPLY_TIMEOUT).await.unwrap().unwrap();
        assert_eq!(reply.as_message().unwrap().args(), &[Atom::Int(expected)]);
    }

    server.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_stop_before_serve_returns_immediately() {
    let server = Server::new(Arc::new(Dispatcher::new()), ServerConfig::default()).unwrap();
    server.stop();
    let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), server.serve_datagrams(transport))
        .await
        .unwrap()
        .unwrap();
}

fn nested_array_datagram(levels: usize) -> Vec<u8> {
    let mut bytes = b"/echo\0\0\0,".to_vec();
    bytes.extend(std::iter::repeat(b'[').take(levels));
    bytes.extend(std::iter::repeat(b']').take(levels));
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deeply_nested_arrays_keep_server_alive() {
    let bomb = nested_array_datagram(32_700);
    assert!(bomb.len() < 65_507);

    for policy in Policy::ALL {
        let (server, addr, task) = start_udp(policy_config(policy)).await;
        let client = UdpClient::connect(&addr.to_string()).await.unwrap();

        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&bomb, addr).await.unwrap();

        client.send_message("/echo", vec![Atom::Int(3)]).await.unwrap();
        let reply = client.recv(REPLY_TIMEOUT).await.unwrap();
        assert!(reply.is_some(), "server stopped answering under {policy}");

        server.shutdown().await;
        task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handlers_see_sender_address() {
    for policy in Policy::ALL {
        let (server, addr, task) = start_udp(policy_config(policy)).await;
        let client = UdpClient::connect(&addr.to_string()).await.unwrap();
        let port = client.local_addr().unwrap().port() as i32;

        client.send_message("/whoami", vec![]).await.unwrap();
        let reply = client.recv(REPLY_TIMEOUT).await.unwrap().unwrap();
        assert_eq!(
            reply.as_message().unwrap().args(),
            &[Atom::Int(port)],
            "policy {policy}"
        );

        server.shutdown().await;
        task.await.unwrap();
    }
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_isolated_server_survives_process_abort() {
    let dispatcher = echo_dispatcher();
    dispatcher
        .map("/abort", |_: &str, _: &[Atom], _: &[Atom]| std::process::abort(), vec![])
        .unwrap();
    let (server, addr, task) = start_udp_with(dispatcher, policy_config(Policy::Isolated)).await;
    let client = UdpClient::connect(&addr.to_string()).await.unwrap();

    client.send_message("/abort", vec![]).await.unwrap();
    assert!(client
        .recv(Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());

    client.send_message("/echo", vec![Atom::Int(9)]).await.unwrap();
    let reply = client.recv(REPLY_TIMEOUT).await.unwrap().unwrap();
    assert_eq!(reply.as_message().unwrap().args(), &[Atom::Int(9)]);

    server.shutdown().await;
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatch_client_routes_server_packets() {
    let (server, addr, task) = start_tcp(ServerConfig::default()).await;

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let replies = Arc::new(Dispatcher::new());
    let log = seen.clone();
    replies
        .map_with_peer(
            "/echo/reply",
            move |peer: Option<SocketAddr>, _: &str, _: &[Atom], args: &[Atom]| {
                log.lock().push((peer, args.to_vec()));
                Ok(None)
            },
            vec![],
        )
        .unwrap();

    let mut client = DispatchClient::connect(&addr.to_string(), replies).await.unwrap();
    for n in [1, 2] {
        let message = Message::new("/echo", vec![Atom::Int(n)]).unwrap();
        client.send(&Packet::Message(message)).await.unwrap();
    }

    let handled = client
        .handle_messages(Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(handled, 2);
    assert_eq!(
        *seen.lock(),
        vec![
            (Some(addr), vec![Atom::Int(1)]),
            (Some(addr), vec![Atom::Int(2)]),
        ]
    );

    client.close().await.unwrap();
    server.shutdown().await;
    task.await.unwrap();
}
