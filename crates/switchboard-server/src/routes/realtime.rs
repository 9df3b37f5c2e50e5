use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use switchboard::session::{CloseInfo, Connection, Frame};
use tracing::{debug, info};

use crate::error::Error;
use crate::state::{AppState, PreparedSession};
use crate::vendor::{self, CHANNEL_BUFFER};

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    #[serde(default)]
    pub customer_id: Option<String>,
}

// Resolve agents and reach the vendor before accepting the upgrade, so failures
// surface as an HTTP error instead of an immediately closed socket.
async fn realtime_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<RealtimeParams>,
    State(state): State<AppState>,
) -> Result<Response, Error> {
    info!(customer_id = ?params.customer_id, "realtime connection requested");
    let prepared = state.prepare_session(params.customer_id).await?;
    let vendor = vendor::connect(&state.vendor).await?;
    Ok(ws.on_upgrade(move |socket| run_session(socket, prepared, vendor)))
}

async fn run_session(socket: WebSocket, prepared: PreparedSession, vendor: Connection) {
    let (engine_side, pump_side) = Connection::pair(CHANNEL_BUFFER);
    let pump = tokio::spawn(pump(socket, pump_side));

    let PreparedSession { manager, session } = prepared;
    let session = manager.run(session, engine_side, vendor).await;
    debug!(session_id = %session.id, "realtime connection finished");
    let _ = pump.await;
}

/// Shuttle frames between the client socket and the engine until either side stops.
async fn pump(socket: WebSocket, connection: Connection) {
    let Connection {
        mut incoming,
        outgoing,
    } = connection;
    let (mut sink, mut stream) = socket.split();

    let to_engine = async {
        while let Some(Ok(message)) = stream.next().await {
            let frame = match message {
                Message::Text(text) => Frame::Text(text.to_string()),
                Message::Close(close) => Frame::Close(close.map(|c| CloseInfo {
                    code: c.code,
                    reason: c.reason.to_string(),
                })),
                _ => continue,
            };
            let closing = matches!(frame, Frame::Close(_));
            if outgoing.send(frame).await.is_err() || closing {
                break;
            }
        }
    };

    let to_socket = async {
        while let Some(frame) = incoming.recv().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text.into()),
                Frame::Close(info) => {
                    let close = info.map(|i| CloseFrame {
                        code: i.code,
                        reason: i.reason.into(),
                    });
                    let _ = sink.send(Message::Close(close)).await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    };

    tokio::select! {
        _ = to_engine => {}
        _ = to_socket => {}
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/realtime", get(realtime_handler))
        .with_state(state)
}
