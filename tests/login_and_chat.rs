//! End-to-end tests driving the hub over a real loopback socket: spawn the
//! hub actor and an accept loop, then speak the wire protocol directly.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use dchub::accounts::Accounts;
use dchub::config::Config;
use dchub::hub::{Hub, HubPaths};
use dchub::usercommands::UserCommands;

async fn login(stream: &mut TcpStream, nick: &str) {
    recv_until(stream, "$Lock").await;
    send(stream, &format!("$ValidateNick {nick}")).await;
    recv_until(stream, &format!("$Hello {nick}")).await;
    send(stream, &format!("$MyINFO $ALL {nick} d$ $5$e@x.com$1$")).await;
    recv_until(stream, "<Welcome>").await;
}

async fn spawn_hub() -> std::net::SocketAddr {
    spawn_hub_with_accounts(Accounts::new()).await
}

async fn spawn_hub_with_accounts(accounts: Accounts) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = Config::default();
    // These tests open several connections back-to-back from the same
    // loopback address; that isn't the join-flood scenario under test here.
    config.joinfloodtime = 0;
    let limits = config.limits.clone();
    let hub = Hub::new(
        config,
        accounts,
        UserCommands::new(),
        String::new(),
        HubPaths {
            config: "/nonexistent".into(),
            accounts: "/nonexistent".into(),
            usercommands: "/nonexistent".into(),
            welcome: "/nonexistent".into(),
        },
    );

    let (hub_tx, hub_rx) = mpsc::channel(64);
    tokio::spawn(hub.run(hub_rx));

    tokio::spawn(async move {
        loop {
            let Ok((socket, peer)) = listener.accept().await else { break };
            let hub_tx = hub_tx.clone();
            let limits = limits.clone();
            tokio::spawn(dchub::io::handle_connection(socket, peer, hub_tx, limits));
        }
    });

    addr
}

async fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"|").await.unwrap();
}

async fn recv_until(stream: &mut TcpStream, marker: &str) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        assert!(n > 0, "connection closed before {marker} arrived");
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if text.contains(marker) {
            return text.into_owned();
        }
    }
}

#[tokio::test]
async fn anonymous_login_reaches_active() {
    let addr = spawn_hub().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let greeting = recv_until(&mut client, "$Lock").await;
    assert!(greeting.contains("$HubName"));

    send(&mut client, "$ValidateNick alice").await;
    let hello = recv_until(&mut client, "$Hello alice").await;
    assert!(hello.contains("$Hello alice"));

    send(&mut client, "$MyINFO $ALL alice my desc$ $5$me@example.com$1000$").await;
    let post_login = recv_until(&mut client, "$MyINFO $ALL alice").await;
    assert!(post_login.contains("<Welcome>"));
}

#[tokio::test]
async fn duplicate_nick_from_second_connection_is_denied() {
    let addr = spawn_hub().await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    recv_until(&mut first, "$Lock").await;
    send(&mut first, "$ValidateNick bob").await;
    recv_until(&mut first, "$Hello bob").await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    recv_until(&mut second, "$Lock").await;
    send(&mut second, "$ValidateNick bob").await;
    let response = recv_until(&mut second, "$ValidateDenide").await;
    assert!(response.contains("$ValidateDenide"));
}

#[tokio::test]
async fn chat_message_is_broadcast_to_other_active_users() {
    let addr = spawn_hub().await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    recv_until(&mut alice, "$Lock").await;
    send(&mut alice, "$ValidateNick alice").await;
    recv_until(&mut alice, "$Hello alice").await;
    send(&mut alice, "$MyINFO $ALL alice d$ $5$e@x.com$1$").await;
    recv_until(&mut alice, "<Welcome>").await;

    let mut bob = TcpStream::connect(addr).await.unwrap();
    recv_until(&mut bob, "$Lock").await;
    send(&mut bob, "$ValidateNick bob").await;
    recv_until(&mut bob, "$Hello bob").await;
    send(&mut bob, "$MyINFO $ALL bob d$ $5$e@x.com$1$").await;
    recv_until(&mut bob, "<Welcome>").await;

    send(&mut alice, "<alice> hi bob").await;
    let received = recv_until(&mut bob, "<alice> hi bob").await;
    assert!(received.contains("<alice> hi bob"));
}

#[tokio::test]
async fn op_kick_closes_target_and_broadcasts_quit() {
    let mut accounts = Accounts::new();
    accounts.set(dchub::accounts::Account {
        name: "admin".to_string(),
        password: String::new(),
        op: true,
        args: String::new(),
    });
    let addr = spawn_hub_with_accounts(accounts).await;

    let mut admin = TcpStream::connect(addr).await.unwrap();
    login(&mut admin, "admin").await;

    let mut victim = TcpStream::connect(addr).await.unwrap();
    login(&mut victim, "eve").await;
    recv_until(&mut admin, "$MyINFO $ALL eve").await;

    send(&mut admin, "$Kick eve").await;

    let quit = recv_until(&mut admin, "$Quit eve").await;
    assert!(quit.contains("$Quit eve"));

    let mut buf = [0u8; 16];
    let closed = tokio::time::timeout(Duration::from_secs(2), victim.read(&mut buf))
        .await
        .expect("timed out waiting for victim's connection to close");
    assert_eq!(closed.unwrap(), 0, "kicked connection should be closed");
}

#[tokio::test]
async fn search_is_relayed_verbatim_to_every_active_user() {
    let addr = spawn_hub().await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    login(&mut alice, "alice").await;

    let mut bob = TcpStream::connect(addr).await.unwrap();
    login(&mut bob, "bob").await;
    recv_until(&mut alice, "$MyINFO $ALL bob").await;

    send(&mut alice, "$Search Hub:alice F?T?0?1?abc").await;

    let received = recv_until(&mut bob, "$Search Hub:alice F?T?0?1?abc").await;
    assert!(received.contains("$Search Hub:alice F?T?0?1?abc"));
}
