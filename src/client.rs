//! Reference client: handshake, then three concurrent tasks.
//!
//! After `CONNECT` is acknowledged the session runs an inbound reader
//! (printing relayed messages), an outbound writer (driving stdin lines to
//! the relay), and a periodic heartbeat. The first task to finish ends the
//! session; the other two are aborted and awaited before this returns.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::Mutex,
    time::sleep,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    command::{COMMAND_PREFIX, Command},
    frame::{read_message, write_message},
    relay::{SUCCESS_REPLY, VERIFY_KEYWORD},
};

// The writer is shared between the outbound task and the heartbeat.
type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, writer) = establish_connection(&args).await?;
    let writer: SharedWriter = Arc::new(Mutex::new(writer));

    perform_handshake(&mut reader, &writer, &args.user).await?;
    write_stdout(&format!("*** connected as {}", args.user)).await?;

    let heartbeat_period = Duration::from_secs(args.heartbeat);
    let mut inbound = tokio::spawn(read_from_server(reader));
    let mut outbound = tokio::spawn(write_to_server(Arc::clone(&writer)));
    let mut heartbeat = tokio::spawn(send_heartbeats(Arc::clone(&writer), heartbeat_period));

    // First completion wins; the remaining tasks are cancelled and awaited so
    // nothing outlives the session.
    select! {
        _ = &mut inbound => {}
        _ = &mut outbound => {}
        _ = &mut heartbeat => {}
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "ctrl-c handler failed");
            }
        }
    }

    for task in [inbound, outbound, heartbeat] {
        task.abort();
        let _ = task.await;
    }

    shutdown_connection(&writer).await;
    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn perform_handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &SharedWriter,
    user: &str,
) -> Result<()> {
    send(writer, &format!("{VERIFY_KEYWORD} {user}")).await?;

    match read_message(reader).await? {
        Some(reply) if reply == SUCCESS_REPLY => Ok(()),
        Some(reply) => bail!("relay rejected the connection: {reply}"),
        None => bail!("relay closed the connection during verification"),
    }
}

async fn read_from_server(mut reader: BufReader<OwnedReadHalf>) -> Result<()> {
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => write_stdout(&format!(">> {message}")).await?,
            Ok(None) => {
                write_stdout("*** relay closed the connection").await?;
                return Ok(());
            }
            Err(error) => {
                warn!(?error, "failed to read from relay");
                return Ok(());
            }
        }
    }
}

async fn write_to_server(writer: SharedWriter) -> Result<()> {
    let mut stdin = BufReader::new(io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        let bytes_read = stdin.read_line(&mut input).await?;
        if bytes_read == 0 {
            return Ok(());
        }

        let text = input.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            continue;
        }

        send(&writer, text).await?;

        // The exit command still goes to the relay so it can unregister us.
        if Command::parse(text) == Some(Command::Exit) {
            write_stdout("*** leaving chat").await?;
            return Ok(());
        }
    }
}

async fn send_heartbeats(writer: SharedWriter, period: Duration) -> Result<()> {
    loop {
        sleep(period).await;
        send(&writer, &format!("{COMMAND_PREFIX}ping")).await?;
    }
}

async fn send(writer: &SharedWriter, message: &str) -> io::Result<()> {
    let mut writer = writer.lock().await;
    write_message(&mut *writer, message).await
}

async fn shutdown_connection(writer: &SharedWriter) {
    let mut writer = writer.lock().await;
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
