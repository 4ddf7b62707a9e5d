//! STOMP over a plain WebSocket (`ws://` or `wss://`).
//!
//! `open()` connects the socket and spawns two tasks bridging it to a
//! [`FramePipe`]: a writer that encodes outbound frames and emits heartbeats,
//! and a reader that decodes inbound text messages and enforces the
//! broker's heartbeat. Either task ending cancels the other, which closes
//! both sides of the pipe.

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FramePipe, PIPE_CAPACITY, Transport};
use crate::error::TransportError;
use crate::stomp::{Command, Frame, HeartBeat};

/// Grace factor applied to the negotiated incoming heartbeat before the
/// connection is considered dead.
const HEARTBEAT_GRACE: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Negotiated {
    send_every: Option<Duration>,
    expect_within: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<FramePipe, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(TransportError::from_tungstenite)?;
        info!(url = %self.url, "websocket connected");

        let (sink, stream) = ws.split();
        Ok(bridge(sink, stream))
    }
}

/// Wire a split WebSocket to a frame pipe.
pub(crate) fn bridge<W, R>(sink: W, stream: R) -> FramePipe
where
    W: Sink<WsMessage, Error = tungstenite::Error> + Unpin + Send + 'static,
    R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(PIPE_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel(PIPE_CAPACITY);
    let (advertised_tx, advertised_rx) = watch::channel(HeartBeat::DISABLED);
    let (negotiated_tx, negotiated_rx) = watch::channel(Negotiated::default());
    let stop = CancellationToken::new();

    tokio::spawn(write_loop(
        sink,
        out_rx,
        advertised_tx,
        negotiated_rx,
        stop.clone(),
    ));
    tokio::spawn(read_loop(stream, in_tx, advertised_rx, negotiated_tx, stop));

    FramePipe {
        outbound: out_tx,
        inbound: in_rx,
    }
}

async fn write_loop<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Frame>,
    advertised: watch::Sender<HeartBeat>,
    mut negotiated: watch::Receiver<Negotiated>,
    stop: CancellationToken,
) where
    W: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let mut ticker: Option<Interval> = None;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Pipe dropped by the owner: say goodbye and close.
                    let _ = sink.send(text(Frame::disconnect().encode())).await;
                    let _ = sink.close().await;
                    break;
                };
                if frame.command == Command::Connect {
                    if let Some(hb) = frame.heart_beat() {
                        let _ = advertised.send(hb);
                    }
                }
                debug!(command = %frame.command, "-> frame");
                if let Err(e) = sink.send(text(frame.encode())).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
                if frame.command == Command::Disconnect {
                    let _ = sink.close().await;
                    break;
                }
            }
            Ok(()) = negotiated.changed() => {
                let every = negotiated.borrow_and_update().send_every;
                ticker = every.map(|d| {
                    let mut interval = tokio::time::interval(d);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    interval
                });
            }
            _ = tick(&mut ticker) => {
                if let Err(e) = sink.send(text("\n".to_string())).await {
                    warn!(error = %e, "heartbeat write failed");
                    break;
                }
            }
        }
    }

    stop.cancel();
}

async fn read_loop<R>(
    mut stream: R,
    inbound: mpsc::Sender<Frame>,
    advertised: watch::Receiver<HeartBeat>,
    negotiated: watch::Sender<Negotiated>,
    stop: CancellationToken,
) where
    R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    let mut expect_within: Option<Duration> = None;

    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = next_within(&mut stream, expect_within) => next,
        };

        let message = match next {
            Err(_elapsed) => {
                warn!(
                    within = ?expect_within,
                    "no heartbeat from broker, dropping connection"
                );
                break;
            }
            Ok(None) => {
                debug!("websocket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let raw = match message {
            WsMessage::Text(t) => t.as_str().to_owned(),
            WsMessage::Binary(b) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    warn!("dropping non-utf8 binary frame");
                    continue;
                }
            },
            WsMessage::Close(reason) => {
                debug!(?reason, "websocket closed by broker");
                break;
            }
            _ => continue,
        };

        let frame = match Frame::decode(&raw) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                continue;
            }
        };

        if frame.command == Command::Connected {
            let server = frame.heart_beat().unwrap_or(HeartBeat::DISABLED);
            let (send_every, expect) = advertised.borrow().negotiate(&server);
            expect_within = expect.map(|d| d * HEARTBEAT_GRACE);
            let _ = negotiated.send(Negotiated {
                send_every,
                expect_within,
            });
            debug!(?send_every, ?expect_within, "heartbeat negotiated");
        }

        debug!(command = %frame.command, "<- frame");
        if inbound.send(frame).await.is_err() {
            break;
        }
    }

    stop.cancel();
}

async fn next_within<R>(
    stream: &mut R,
    within: Option<Duration>,
) -> Result<Option<Result<WsMessage, tungstenite::Error>>, tokio::time::error::Elapsed>
where
    R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    match within {
        Some(d) => tokio::time::timeout(d, stream.next()).await,
        None => Ok(stream.next().await),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn text(s: String) -> WsMessage {
    WsMessage::Text(s.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one WebSocket connection and return its split halves.
    async fn loopback() -> (
        WebSocketTransport,
        tokio::task::JoinHandle<
            tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        >,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(tcp).await.unwrap()
        });
        (WebSocketTransport::new(format!("ws://{addr}")), accept)
    }

    #[tokio::test]
    async fn frames_cross_a_real_socket() {
        let (transport, accept) = loopback().await;
        let mut pipe = transport.open().await.unwrap();
        let mut server = accept.await.unwrap();

        pipe.outbound
            .send(Frame::subscribe("sub-1", "/user/u1/private"))
            .await
            .unwrap();
        let got = server.next().await.unwrap().unwrap();
        let frame = Frame::decode(got.to_text().unwrap()).unwrap().unwrap();
        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.get("id"), Some("sub-1"));

        let msg = Frame::new(Command::Message)
            .header("subscription", "sub-1")
            .with_body("{}");
        server.send(text("\n".into())).await.unwrap();
        server.send(text("GARBAGE\n\n\0".into())).await.unwrap();
        server.send(text(msg.encode())).await.unwrap();

        // Heartbeat and malformed frame are skipped; the message arrives.
        let received = pipe.inbound.recv().await.unwrap();
        assert_eq!(received.command, Command::Message);
        assert_eq!(received.body, "{}");
    }

    #[tokio::test]
    async fn dropping_the_pipe_disconnects() {
        let (transport, accept) = loopback().await;
        let pipe = transport.open().await.unwrap();
        let mut server = accept.await.unwrap();

        drop(pipe);

        let got = server.next().await.unwrap().unwrap();
        let frame = Frame::decode(got.to_text().unwrap()).unwrap().unwrap();
        assert_eq!(frame.command, Command::Disconnect);
    }

    #[tokio::test]
    async fn server_close_ends_inbound() {
        let (transport, accept) = loopback().await;
        let mut pipe = transport.open().await.unwrap();
        let mut server = accept.await.unwrap();

        server.close(None).await.unwrap();
        assert!(pipe.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WebSocketTransport::new(format!("ws://{addr}"))
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }
}
