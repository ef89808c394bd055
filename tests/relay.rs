use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use broadcast_relay::{
    frame::{read_message, write_message},
    relay::Relay,
};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    io::BufReader,
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const IDLE_WINDOW: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE_WINDOW: Duration = Duration::from_millis(300);

struct TestRelay {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TestRelay {
    async fn start(idle_window: Duration) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let relay = Relay::new(listener, idle_window);
        let addr = relay.local_addr()?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Connects and completes the handshake, asserting on the reply.
    async fn join(addr: SocketAddr, user: &str) -> Result<Self> {
        let mut peer = Self::connect(addr).await?;
        peer.send(&format!("CONNECT {user}")).await?;
        let reply = peer.recv().await?;
        assert_eq!(reply.as_deref(), Some("SUCCESS"));
        Ok(peer)
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        write_message(&mut self.writer, message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(timeout(READ_TIMEOUT, read_message(&mut self.reader)).await??)
    }

    /// Asserts nothing arrives for a short while.
    async fn expect_silence(&mut self) {
        let outcome = timeout(SILENCE_WINDOW, read_message(&mut self.reader)).await;
        assert!(outcome.is_err(), "expected silence, got {outcome:?}");
    }
}

#[tokio::test]
async fn broadcasts_reach_every_other_peer() -> Result<()> {
    let relay = TestRelay::start(IDLE_WINDOW).await?;

    let mut alice = Peer::join(relay.addr, "alice").await?;
    let mut bob = Peer::join(relay.addr, "bob").await?;
    let mut carol = Peer::join(relay.addr, "carol").await?;

    alice.send("hello everyone").await?;

    assert_eq!(bob.recv().await?.as_deref(), Some("hello everyone"));
    assert_eq!(carol.recv().await?.as_deref(), Some("hello everyone"));
    alice.expect_silence().await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn unverified_connections_never_join() -> Result<()> {
    let relay = TestRelay::start(IDLE_WINDOW).await?;

    // Wrong first message: silent close, never registered.
    let mut intruder = Peer::connect(relay.addr).await?;
    intruder.send("HELLO there").await?;
    assert_eq!(intruder.recv().await?, None);

    let mut alice = Peer::join(relay.addr, "alice").await?;
    alice.send("\\\\clients").await?;
    assert_eq!(alice.recv().await?.as_deref(), Some("CLIENTS: alice"));

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn handshake_tokens_shape_the_identity() -> Result<()> {
    let relay = TestRelay::start(IDLE_WINDOW).await?;

    // Extra tokens after the username are ignored; a bare CONNECT falls back
    // to the sentinel identity.
    let mut alice = Peer::join(relay.addr, "alice extra tokens").await?;
    let mut nameless = Peer::connect(relay.addr).await?;
    nameless.send("CONNECT").await?;
    assert_eq!(nameless.recv().await?.as_deref(), Some("SUCCESS"));

    alice.send("\\\\clients").await?;
    assert_eq!(
        alice.recv().await?.as_deref(),
        Some("CLIENTS: alice, anonymous")
    );

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn exit_closes_only_the_issuer() -> Result<()> {
    let relay = TestRelay::start(IDLE_WINDOW).await?;

    let mut alice = Peer::join(relay.addr, "alice").await?;
    let mut bob = Peer::join(relay.addr, "bob").await?;
    let mut carol = Peer::join(relay.addr, "carol").await?;

    carol.send("\\\\exit").await?;
    // The closed socket confirms the relay finished tearing carol down.
    assert_eq!(carol.recv().await?, None);

    alice.send("\\\\clients").await?;
    assert_eq!(alice.recv().await?.as_deref(), Some("CLIENTS: alice, bob"));

    alice.send("still chatting").await?;
    assert_eq!(bob.recv().await?.as_deref(), Some("still chatting"));

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn unknown_commands_are_reported_to_the_sender_only() -> Result<()> {
    let relay = TestRelay::start(IDLE_WINDOW).await?;

    let mut alice = Peer::join(relay.addr, "alice").await?;
    let mut bob = Peer::join(relay.addr, "bob").await?;

    alice.send("\\\\foo").await?;
    assert_eq!(alice.recv().await?.as_deref(), Some("UNKNOWN COMMAND: foo"));
    bob.expect_silence().await;

    alice.send("\\\\clients").await?;
    assert_eq!(alice.recv().await?.as_deref(), Some("CLIENTS: alice, bob"));

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn ping_is_silent() -> Result<()> {
    let relay = TestRelay::start(IDLE_WINDOW).await?;

    let mut alice = Peer::join(relay.addr, "alice").await?;
    let mut bob = Peer::join(relay.addr, "bob").await?;

    alice.send("\\\\ping").await?;
    alice.expect_silence().await;
    bob.expect_silence().await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn idle_connections_are_closed() -> Result<()> {
    let relay = TestRelay::start(Duration::from_millis(500)).await?;

    let mut alice = Peer::join(relay.addr, "alice").await?;
    assert_eq!(alice.recv().await?, None);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn chat_traffic_resets_the_idle_deadline() -> Result<()> {
    let relay = TestRelay::start(Duration::from_secs(1)).await?;

    let mut alice = Peer::join(relay.addr, "alice").await?;

    // Send inside the window: the deadline moves to ~1.5s from the start.
    sleep(Duration::from_millis(500)).await;
    alice.send("still here").await?;

    // Past the original deadline the connection is still alive.
    sleep(Duration::from_millis(700)).await;
    alice.send("\\\\clients").await?;
    assert_eq!(alice.recv().await?.as_deref(), Some("CLIENTS: alice"));

    // Commands did not reset anything, so the moved deadline still fires.
    assert_eq!(alice.recv().await?, None);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn ping_does_not_reset_the_idle_deadline() -> Result<()> {
    let relay = TestRelay::start(Duration::from_millis(600)).await?;

    let mut alice = Peer::join(relay.addr, "alice").await?;

    sleep(Duration::from_millis(300)).await;
    alice.send("\\\\ping").await?;

    // Despite the keepalive the original deadline closes the connection.
    assert_eq!(alice.recv().await?, None);

    relay.stop().await;
    Ok(())
}
