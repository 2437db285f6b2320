// SPDX-License-Identifier: Apache-2.0
//! WebSocket gateway for trickle asset streams.
//!
//! One scheduler per connection. Headers ride text frames, chunk bytes ride
//! binary frames; between turns the gateway polls the socket so receiver
//! feedback (re-sort, new requests) lands between any two chunks.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket},
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures_util::FutureExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trickle_asset::{AssetCache, FsAssetProvider, FsRangeReader};
use trickle_proto::{decode_header, encode_header, Header, Policy, ProtoError};
use trickle_sched::{Feedback, OutFrame, Scheduler, Status};

#[derive(Parser, Debug)]
#[command(author, version, about = "trickle asset stream gateway")]
struct Args {
    /// TCP listener for browser clients (e.g. 0.0.0.0:8990)
    #[arg(long, default_value = "0.0.0.0:8990")]
    listen: SocketAddr,
    /// Directory holding asset tables (<ref>.json) and their backing stores
    #[arg(long, default_value = "assets")]
    asset_root: PathBuf,
    /// Transport chunk cap in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_bytes: u64,
    /// Chunk cap for animation keyframe payloads when temporal chunking is on
    #[arg(long, default_value_t = 32)]
    animation_chunk_bytes: u64,
}

struct AppState {
    asset_root: PathBuf,
    chunk_bytes: u64,
    animation_chunk_bytes: u64,
    provider: FsAssetProvider,
    cache: AssetCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let state = Arc::new(AppState {
        asset_root: args.asset_root.clone(),
        chunk_bytes: args.chunk_bytes,
        animation_chunk_bytes: args.animation_chunk_bytes,
        provider: FsAssetProvider::new(&args.asset_root),
        cache: AssetCache::new(),
    });

    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

    info!(listen = %args.listen, root = %args.asset_root.display(), "gateway listening");
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .context("bind listener")?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("serve")?;
    Ok(())
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        info!(?addr, "session open");
        if let Err(err) = serve_session(socket, &state).await {
            warn!(?addr, ?err, "session ended with error");
        }
        info!(?addr, "session closed");
    })
}

/// Drive one session: block on feedback while idle, otherwise interleave
/// polling the socket with staging, sending, and confirming turns.
async fn serve_session(mut socket: WebSocket, state: &Arc<AppState>) -> Result<()> {
    let policy = Policy {
        animation_chunk_bytes: state.animation_chunk_bytes.max(1),
        ..Policy::default()
    };
    let mut sched = Scheduler::new(state.chunk_bytes, policy);
    let mut reader = FsRangeReader::new(&state.asset_root);

    loop {
        // Feedback that is already waiting takes effect before the next turn.
        while let Some(inbound) = socket.recv().now_or_never() {
            match inbound {
                Some(Ok(msg)) => {
                    if !handle_inbound(msg, &mut sched, &mut socket, state).await? {
                        return Ok(());
                    }
                }
                Some(Err(err)) => return Err(err).context("ws recv"),
                None => return Ok(()),
            }
        }

        let turn = sched.next_turn(&mut reader)?;
        if turn.frames.is_empty() {
            debug_assert!(turn.status != Status::Streaming);
            // Nothing to send; park until the client speaks.
            match socket.recv().await {
                Some(Ok(msg)) => {
                    if !handle_inbound(msg, &mut sched, &mut socket, state).await? {
                        return Ok(());
                    }
                }
                Some(Err(err)) => return Err(err).context("ws recv"),
                None => return Ok(()),
            }
            continue;
        }

        for frame in turn.frames {
            if socket.send(to_message(frame)?).await.is_err() {
                // Client went away mid-turn: leave the turn unconfirmed so a
                // future transport could resume at the same position.
                sched.pause();
                return Ok(());
            }
        }
        sched.confirm_dispatched();
    }
}

/// Map a scheduler frame onto the transport: headers become text frames,
/// chunks become binary frames.
fn to_message(frame: OutFrame) -> Result<Message, ProtoError> {
    Ok(match frame {
        OutFrame::Header(header) => Message::Text(encode_header(&header)?.into()),
        OutFrame::Chunk(bytes) => Message::Binary(bytes.into()),
    })
}

/// Apply one inbound message. Returns `false` when the session should end.
async fn handle_inbound(
    msg: Message,
    sched: &mut Scheduler,
    socket: &mut WebSocket,
    state: &Arc<AppState>,
) -> Result<bool> {
    match msg {
        Message::Text(text) => {
            let header = match decode_header(text.as_str()) {
                Ok(header) => header,
                Err(err) => {
                    warn!(?err, "undecodable feedback header");
                    send_header(
                        socket,
                        &Header::Warning { message: format!("undecodable header: {err}") },
                    )
                    .await;
                    return Ok(true);
                }
            };
            if let Feedback::RequestAsset(reference) = sched.handle_feedback(header) {
                match state.cache.fetch(&state.provider, &reference) {
                    Ok(table) => {
                        if let Some(reply) = launch_or_error(sched, &reference, &table) {
                            send_header(socket, &reply).await;
                        }
                    }
                    Err(err) => {
                        warn!(%reference, ?err, "asset request failed");
                        send_header(
                            socket,
                            &Header::Error { message: format!("asset {reference}: {err}") },
                        )
                        .await;
                    }
                }
            }
            Ok(true)
        }
        Message::Binary(_) => {
            warn!("unexpected binary frame from client; ignored");
            Ok(true)
        }
        Message::Close(_) => Ok(false),
        Message::Ping(_) | Message::Pong(_) => Ok(true),
    }
}

/// Launch `table`, mapping failures (inconsistent node graph, id
/// derivation) onto an error header: a bad table never ends the session.
fn launch_or_error(
    sched: &mut Scheduler,
    reference: &str,
    table: &trickle_asset::AssetTable,
) -> Option<Header> {
    match sched.launch(table) {
        Ok(()) => None,
        Err(err) => {
            warn!(%reference, ?err, "launch failed");
            Some(Header::Error { message: format!("asset {reference}: {err}") })
        }
    }
}

async fn send_header(socket: &mut WebSocket, header: &Header) {
    match encode_header(header) {
        Ok(text) => {
            let _ = socket.send(Message::Text(text.into())).await;
        }
        Err(err) => warn!(?err, "header encode failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trickle_asset::{AssetTable, MemoryRangeReader};
    use trickle_graph::NodeDesc;

    #[test]
    fn inconsistent_table_becomes_an_error_reply_not_a_closed_session() {
        let mut sched = Scheduler::new(1024, Policy::default());
        let mut table = AssetTable::default();
        table.nodes = vec![NodeDesc::bare("n0"), NodeDesc::bare("n0")];

        let reply = launch_or_error(&mut sched, "broken", &table);
        assert!(matches!(reply, Some(Header::Error { .. })));

        // The session keeps serving: the scheduler is still idle and usable.
        let mut reader = MemoryRangeReader::new();
        let turn = sched.next_turn(&mut reader).expect("turn");
        assert_eq!(turn.status, Status::Idle);
    }

    #[test]
    fn headers_map_to_text_frames_and_chunks_to_binary() {
        let msg = to_message(OutFrame::Header(Header::StreamComplete)).expect("encode");
        assert!(matches!(msg, Message::Text(t) if t.as_str().contains("stream-complete")));

        let msg = to_message(OutFrame::Chunk(vec![1, 2, 3])).expect("encode");
        assert!(matches!(msg, Message::Binary(b) if b.as_ref() == [1, 2, 3]));
    }
}
