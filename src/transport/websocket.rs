//! Realtime connector backed by `tokio-tungstenite`.

use futures::{SinkExt, StreamExt, future::BoxFuture};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message, Utf8Bytes},
};
use tracing::debug;
use url::Url;

use super::{
    TransportError, TransportResult,
    channel::{CloseInfo, Connection, Connector, Frame, NO_STATUS_RECEIVED, Outgoing},
};

/// Opens websocket connections; one writer task per connection drains outbound messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Connector with default settings.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, TransportResult<Connection>> {
        Box::pin(async move {
            let endpoint = redacted(&url);
            let (stream, _response) =
                connect_async(url.as_str())
                    .await
                    .map_err(|err| TransportError::Handshake {
                        url: endpoint.clone(),
                        message: err.to_string(),
                    })?;
            debug!(endpoint = %endpoint, "websocket handshake completed");

            let (mut sink, mut source) = stream.split();
            let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();

            tokio::spawn(async move {
                while let Some(outgoing) = outgoing_rx.recv().await {
                    let (message, last) = match outgoing {
                        Outgoing::Text(text) => (Message::Text(Utf8Bytes::from(text)), false),
                        Outgoing::Close => (Message::Close(None), true),
                    };
                    if sink.send(message).await.is_err() || last {
                        break;
                    }
                }
            });

            let frames = async_stream::stream! {
                while let Some(message) = source.next().await {
                    match message {
                        Ok(Message::Text(text)) => yield Frame::Text(text.as_str().to_owned()),
                        Ok(Message::Close(frame)) => {
                            yield Frame::Close(match frame {
                                Some(frame) => {
                                    CloseInfo::new(u16::from(frame.code), frame.reason.as_str())
                                }
                                None => CloseInfo::new(NO_STATUS_RECEIVED, ""),
                            });
                            return;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            yield Frame::Error(err.to_string());
                            break;
                        }
                    }
                }
                yield Frame::Close(CloseInfo::abnormal());
            };

            Ok(Connection::new(Box::pin(frames), outgoing_tx))
        })
    }
}

/// Endpoint without its query string, so credentials never reach the logs.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
