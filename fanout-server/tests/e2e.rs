use std::{process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[tokio::test]
async fn binary_serves_websocket_chat() -> Result<()> {
    let (mut server, mut stdout) = spawn_server().await?;
    let addr = read_server_addr(&mut stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let log_task = tokio::spawn(drain_stdout(stdout));

    let url = format!("ws://{addr}/ws");
    let mut alice = connect(&url).await?;
    let mut bob = connect(&url).await?;

    send(&mut alice, json!({ "type": "JOIN", "userId": "alice" })).await?;
    assert_eq!(read_json(&mut alice).await?["message"], "You are now the admin");
    assert_eq!(read_json(&mut alice).await?["activeUsers"], json!(["alice"]));

    send(&mut bob, json!({ "type": "JOIN", "userId": "bob" })).await?;
    assert_eq!(
        read_json(&mut bob).await?["activeUsers"],
        json!(["alice", "bob"])
    );
    assert_eq!(read_json(&mut alice).await?["userId"], "bob");

    send(
        &mut bob,
        json!({ "type": "CHAT", "content": "hi alice", "recipientId": "alice" }),
    )
    .await?;
    let direct = read_json(&mut alice).await?;
    assert_eq!(direct["type"], "CHAT");
    assert_eq!(direct["senderId"], "bob");
    assert_eq!(direct["recipientId"], "alice");

    send(&mut bob, json!({ "type": "LEAVE" })).await?;
    let left = read_json(&mut alice).await?;
    assert_eq!(left["type"], "LEAVE");
    assert_eq!(left["message"], "bob has left the chat");

    alice.close(None).await?;
    bob.close(None).await?;

    // The server keeps running after clients disconnect; terminate it manually.
    let _ = server.kill().await;
    let _ = server.wait().await;
    let _ = log_task.await;

    Ok(())
}

async fn spawn_server() -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fanout-server"));
    cmd.arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    const BANNER: &str = "server listening on ";

    loop {
        let line = read_line(reader)
            .await?
            .context("server exited before announcing its address")?;
        let Some((_, rest)) = line.split_once(BANNER) else {
            continue;
        };
        let addr = rest
            .split_whitespace()
            .next()
            .context("unexpected server banner format")?;
        if !addr.contains(':') {
            return Err(anyhow!("server banner missing socket: {line}"));
        }
        return Ok(addr.to_string());
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let byte_count = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result?,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while let Ok(bytes) = reader.read_line(&mut buffer).await {
        if bytes == 0 {
            break;
        }
        buffer.clear();
    }
}

async fn connect(url: &str) -> Result<WsStream> {
    let (mut ws, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let hello = read_json(&mut ws).await?;
    assert_eq!(hello["message"], "Connected to WebSocket server");
    Ok(ws)
}

async fn send(ws: &mut WsStream, value: Value) -> Result<()> {
    ws.send(Message::Text(value.to_string())).await?;
    Ok(())
}

async fn read_json(ws: &mut WsStream) -> Result<Value> {
    loop {
        let frame = timeout(READ_TIMEOUT, ws.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for a frame"))?
            .context("stream closed")??;
        if let Message::Text(text) = frame {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}
