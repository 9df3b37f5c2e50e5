//! The server side of the bridge towards the hosted realtime service.

use futures::{SinkExt, StreamExt};
use switchboard::session::{CloseInfo, Connection, Frame};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::configuration::VendorSettings;

pub const CHANNEL_BUFFER: usize = 256;

#[derive(Error, Debug)]
pub enum VendorError {
    #[error("invalid credentials header: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// Open the vendor socket and expose it as a [`Connection`].
pub async fn connect(settings: &VendorSettings) -> Result<Connection, VendorError> {
    let mut request = settings.endpoint().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", settings.api_key))?,
    );
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (socket, response) = tokio_tungstenite::connect_async(request).await?;
    debug!(status = %response.status(), "connected to realtime service");

    let (engine_side, pump_side) = Connection::pair(CHANNEL_BUFFER);
    tokio::spawn(pump(socket, pump_side));
    Ok(engine_side)
}

/// Shuttle frames between the socket and the engine until either side stops.
async fn pump(socket: WebSocketStream<MaybeTlsStream<TcpStream>>, connection: Connection) {
    let Connection {
        mut incoming,
        outgoing,
    } = connection;
    let (mut sink, mut stream) = socket.split();

    let to_engine = async {
        while let Some(message) = stream.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => Frame::Text(text.to_string()),
                Ok(Message::Close(close)) => Frame::Close(close.map(|c| CloseInfo {
                    code: c.code.into(),
                    reason: c.reason.to_string(),
                })),
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "realtime service socket failed");
                    break;
                }
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
                        code: CloseCode::from(i.code),
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
