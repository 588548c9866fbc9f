//! `sketchboard join`: one interactive session against a relay server.

use anyhow::Context;
use sketchboard_core::relay::{LinkStatus, Relay, RelayConfig, RelayState, TcpDialer};
use sketchboard_core::storage::{FileLogStorage, LogAutoSave};
use sketchboard_core::{
    DomainEvent, Session, StreamTransport, Transport, WebSocketTransport, generate_peer_id,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{JoinArgs, TransportArg};

pub async fn run(args: JoinArgs, config: RelayConfig) -> anyhow::Result<()> {
    match args.transport {
        TransportArg::Websocket => {
            let transport = WebSocketTransport::new(&args.url)?;
            join(transport, args, config).await
        }
        TransportArg::Stream => {
            let transport =
                StreamTransport::with_max_frame_len(TcpDialer::new(&args.url), config.max_frame_len);
            join(transport, args, config).await
        }
    }
}

async fn join<T: Transport>(transport: T, args: JoinArgs, config: RelayConfig) -> anyhow::Result<()> {
    let peer = args.peer.clone().unwrap_or_else(generate_peer_id);
    log::info!("Joining canvas {} as {peer}", args.canvas);
    let mut session = Session::new(peer);

    if let Some(path) = args.log.as_ref().filter(|path| path.exists()) {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let report = session.import_log(&text)?;
        log::info!("Restored {} events from {}", report.applied, path.display());
    }

    let mut autosave = match &args.autosave_dir {
        Some(dir) => Some(LogAutoSave::new(Arc::new(FileLogStorage::new(dir.clone())?), args.canvas.clone())),
        None => None,
    };

    session.bus_mut().subscribe_to_all(|event| {
        println!("{}", event.to_json()?);
        Ok(())
    });

    let mut relay = Relay::new(transport, args.canvas.clone(), config)
        .with_error_sink(|err| log::warn!("Event not sent: {err}"));
    if let Err(err) = relay.connect(session.bus_mut()).await {
        log::warn!("Connect failed: {err}");
        relay.reconnect(session.bus_mut()).await?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut autosave_tick = tokio::time::interval(Duration::from_secs(5));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome: anyhow::Result<()> = loop {
        tokio::select! {
            activity = relay.next_activity(), if relay.state() == RelayState::Streaming => {
                let link = relay.apply(activity, session.bus_mut()).await;
                match link {
                    Ok(LinkStatus::Open) => {}
                    Ok(LinkStatus::Closed) => log::warn!("Server closed the connection"),
                    Err(err) => log::warn!("Link lost: {err}"),
                }
                if relay.state() == RelayState::Disconnected {
                    if let Err(err) = relay.reconnect(session.bus_mut()).await {
                        break Err(err.into());
                    }
                }
            }
            line = stdin.next_line() => match line {
                Ok(Some(line)) => dispatch_line(&mut session, &line),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err.into()),
            },
            _ = autosave_tick.tick(), if autosave.is_some() => {
                if let Some(autosave) = autosave.as_mut() {
                    let snapshot = session.log().borrow().clone();
                    if let Err(err) = autosave.maybe_save(&snapshot).await {
                        log::warn!("Autosave failed: {err}");
                    }
                }
            }
            _ = &mut ctrl_c => break Ok(()),
        }
    };

    relay.flush().await;
    relay.disconnect(session.bus_mut()).await;

    let snapshot = session.log().borrow().clone();
    if let Some(autosave) = autosave.as_mut() {
        autosave.save(&snapshot).await?;
    }
    if let Some(path) = &args.log {
        std::fs::write(path, snapshot.text()).with_context(|| format!("writing {}", path.display()))?;
        log::info!("Saved {} events to {}", snapshot.len(), path.display());
    }
    outcome
}

fn dispatch_line(session: &mut Session, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match DomainEvent::from_json(line) {
        Ok(event) => {
            session.dispatch(event);
        }
        Err(err) => log::warn!("Ignoring input line: {err}"),
    }
}
