//! Census WebSocket client with auto-reconnect.
//!
//! A background task owns the connection and reports everything it sees as
//! [`StreamSignal`]s on an unbounded channel. Callers steer it with
//! [`StreamCommand`]s. Reconnect/backoff lives here so that the relay loop
//! never has to.

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use alertrelay_core::dedup::RecentKeys;
use alertrelay_core::error::RelayError;
use alertrelay_core::event::GameEvent;

use crate::census::{classify, CensusConfig, CensusMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something the stream task observed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// The push service confirmed the connection.
    Ready,
    /// The upstream acknowledged a subscribe request.
    Subscribed { worlds: usize },
    Event(GameEvent),
    Heartbeat,
    /// A world feed behind the push service changed state.
    ServiceState { detail: String, online: bool },
    /// An event already seen inside the dedup window.
    Duplicate { key: String },
    /// A corrupt or unrecognised message.
    Warn(String),
    /// The connection dropped.
    Disconnected { reason: String },
    /// About to reconnect after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// A command could not be carried out, e.g. a resubscribe send failed.
    Error(String),
}

/// Instruction for the stream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    /// Re-send the subscribe request on the live connection.
    Resubscribe,
    /// Close the connection and end the task.
    Close,
}

/// Handle to the background Census connection.
pub struct CensusClient {
    cmd_tx: mpsc::UnboundedSender<StreamCommand>,
}

impl CensusClient {
    /// Open the first connection, then hand it to a background task.
    ///
    /// An error here means the initial connection could not be established,
    /// which the caller should treat as fatal. Later drops are retried by the
    /// task with exponential backoff.
    pub async fn connect(
        config: CensusConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamSignal>), RelayError> {
        let url = config.stream_url()?;
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| RelayError::Transport(format!("connect {}: {e}", config.endpoint)))?;
        info!(endpoint = %config.endpoint, environment = %config.environment, "Census stream connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(stream_task(url.to_string(), ws, cmd_rx, signal_tx, config));

        Ok((Self { cmd_tx }, signal_rx))
    }

    /// Sender for commands, e.g. for the relay loop's resubscribe timer.
    pub fn commands(&self) -> mpsc::UnboundedSender<StreamCommand> {
        self.cmd_tx.clone()
    }
}

impl Drop for CensusClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(StreamCommand::Close);
    }
}

/// Why a session ended.
enum SessionEnd {
    Dropped(String),
    Shutdown,
}

/// Background task that owns the WebSocket connection.
async fn stream_task(
    url: String,
    first: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<StreamCommand>,
    signals: mpsc::UnboundedSender<StreamSignal>,
    config: CensusConfig,
) {
    let mut seen = RecentKeys::new(config.dedup_window);
    let mut backoff = config.reconnect_initial;
    let mut attempt = 0u32;
    let mut conn = Some(first);

    loop {
        let ws = match conn.take() {
            Some(ws) => ws,
            None => match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    info!(endpoint = %config.endpoint, "Census stream reconnected");
                    ws
                }
                Err(e) => {
                    attempt += 1;
                    warn!(error = %e, "Census connect failed, retrying in {backoff:?}");
                    let _ = signals.send(StreamSignal::Reconnecting { attempt, delay: backoff });
                    if wait_or_close(backoff, &mut cmd_rx).await {
                        return;
                    }
                    backoff = (backoff * 2).min(config.reconnect_max);
                    continue;
                }
            },
        };
        backoff = config.reconnect_initial; // reset on success
        attempt = 0;

        match run_session(ws, &config, &mut cmd_rx, &signals, &mut seen).await {
            SessionEnd::Shutdown => return,
            SessionEnd::Dropped(reason) => {
                if signals.send(StreamSignal::Disconnected { reason }).is_err() {
                    // Nobody is listening any more.
                    return;
                }
                attempt += 1;
                let _ = signals.send(StreamSignal::Reconnecting { attempt, delay: backoff });
                if wait_or_close(backoff, &mut cmd_rx).await {
                    return;
                }
                backoff = (backoff * 2).min(config.reconnect_max);
            }
        }
    }
}

/// Sleep for `delay`; returns `true` if a close arrived meanwhile.
/// Resubscribe requests during the wait are dropped: the reconnect
/// subscribes anyway.
async fn wait_or_close(delay: Duration, cmd_rx: &mut mpsc::UnboundedReceiver<StreamCommand>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(StreamCommand::Close) => return true,
                Some(StreamCommand::Resubscribe) => {}
            }
        }
    }
}

async fn run_session<W>(
    ws: W,
    config: &CensusConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<StreamCommand>,
    signals: &mpsc::UnboundedSender<StreamSignal>,
    seen: &mut RecentKeys,
) -> SessionEnd
where
    W: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let subscribe = config.subscribe_message().to_string();

    if let Err(e) = sink.send(Message::Text(subscribe.clone().into())).await {
        return SessionEnd::Dropped(format!("subscribe send failed: {e}"));
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(StreamCommand::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                Some(StreamCommand::Resubscribe) => {
                    if let Err(e) = sink.send(Message::Text(subscribe.clone().into())).await {
                        let _ = signals.send(StreamSignal::Error(format!("resubscribe failed: {e}")));
                        return SessionEnd::Dropped(format!("resubscribe send failed: {e}"));
                    }
                    debug!("subscription re-sent");
                }
            },
            msg = stream.next() => match msg {
                None => return SessionEnd::Dropped("stream closed".into()),
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                Some(Ok(Message::Text(text))) => {
                    if let Some(signal) = to_signal(classify(text.as_str()), seen) {
                        if signals.send(signal).is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".into());
                    return SessionEnd::Dropped(reason);
                }
                Some(Ok(_)) => {} // binary / pong
            }
        }
    }
}

/// Map a classified message to the signal the relay loop sees; drops the
/// help greeting and repeats inside the dedup window.
pub fn to_signal(message: CensusMessage, seen: &mut RecentKeys) -> Option<StreamSignal> {
    match message {
        CensusMessage::ConnectionState { connected: true } => Some(StreamSignal::Ready),
        CensusMessage::ConnectionState { connected: false } => Some(StreamSignal::Disconnected {
            reason: "push service reported disconnected".into(),
        }),
        CensusMessage::ServiceState { detail, online } => {
            Some(StreamSignal::ServiceState { detail, online })
        }
        CensusMessage::Heartbeat => Some(StreamSignal::Heartbeat),
        CensusMessage::Subscribed { worlds } => Some(StreamSignal::Subscribed { worlds }),
        CensusMessage::Help => None,
        CensusMessage::Event(event) => {
            let key = event.dedup_key();
            if seen.insert(key.clone()) {
                Some(StreamSignal::Event(event))
            } else {
                Some(StreamSignal::Duplicate { key })
            }
        }
        CensusMessage::Unrecognised(text) | CensusMessage::Malformed(text) => {
            Some(StreamSignal::Warn(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::net::TcpListener;

    const STARTED: &str = r#"{"payload":{"event_name":"MetagameEvent","instance_id":"9","metagame_event_state_name":"started","world_id":"13","zone_id":"6"},"service":"event","type":"serviceMessage"}"#;

    #[test]
    fn repeated_event_becomes_duplicate() {
        let mut seen = RecentKeys::new(16);
        let first = to_signal(classify(STARTED), &mut seen).unwrap();
        assert!(matches!(first, StreamSignal::Event(ref e) if e.instance_id == "9"));

        let second = to_signal(classify(STARTED), &mut seen).unwrap();
        assert_eq!(second, StreamSignal::Duplicate { key: "13:9:started".into() });
    }

    #[test]
    fn help_greeting_is_swallowed() {
        let mut seen = RecentKeys::new(4);
        let help = r#"{"send this for help":{"service":"event","action":"help"}}"#;
        assert!(to_signal(classify(help), &mut seen).is_none());
    }

    #[test]
    fn corrupt_message_warns() {
        let mut seen = RecentKeys::new(4);
        let signal = to_signal(classify("\u{0}garbage"), &mut seen).unwrap();
        assert!(matches!(signal, StreamSignal::Warn(_)));
    }

    #[test]
    fn connection_state_maps_to_ready_or_disconnected() {
        let mut seen = RecentKeys::new(4);
        assert_eq!(
            to_signal(CensusMessage::ConnectionState { connected: true }, &mut seen),
            Some(StreamSignal::Ready)
        );
        assert!(matches!(
            to_signal(CensusMessage::ConnectionState { connected: false }, &mut seen),
            Some(StreamSignal::Disconnected { .. })
        ));
    }

    fn started(instance: &str) -> String {
        STARTED.replace(r#""instance_id":"9""#, &format!(r#""instance_id":"{instance}""#))
    }

    async fn next_signal(signals: &mut mpsc::UnboundedReceiver<StreamSignal>) -> StreamSignal {
        time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("signal within 5s")
            .expect("stream task alive")
    }

    #[tokio::test]
    async fn reconnects_and_subscribes_again_after_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut subscribes = Vec::new();
            for instance in ["1", "2"] {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => subscribes.push(text.to_string()),
                    other => panic!("expected subscribe request, got {other:?}"),
                }
                ws.send(Message::Text(started(instance).into())).await.unwrap();
                if instance == "1" {
                    ws.close(None).await.unwrap();
                } else {
                    // Hold the second session open until the client goes away.
                    while let Some(Ok(_)) = ws.next().await {}
                }
            }
            subscribes
        });

        let config = CensusConfig {
            endpoint: format!("ws://{addr}/streaming"),
            reconnect_initial: Duration::from_millis(10),
            ..CensusConfig::for_service("example")
        };
        let (client, mut signals) = CensusClient::connect(config.clone()).await.unwrap();

        assert!(matches!(next_signal(&mut signals).await, StreamSignal::Event(ref e) if e.instance_id == "1"));
        assert_eq!(
            next_signal(&mut signals).await,
            StreamSignal::Disconnected { reason: "closed by server".into() }
        );
        assert_eq!(
            next_signal(&mut signals).await,
            StreamSignal::Reconnecting { attempt: 1, delay: Duration::from_millis(10) }
        );
        assert!(matches!(next_signal(&mut signals).await, StreamSignal::Event(ref e) if e.instance_id == "2"));

        drop(client);
        let subscribes = time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        let expected = config.subscribe_message().to_string();
        assert_eq!(subscribes, vec![expected.clone(), expected]);
    }

    /// Socket that never yields a frame and accepts `accept` sends before
    /// failing every later one.
    struct FlakySocket {
        sent: Arc<Mutex<Vec<Message>>>,
        accept: usize,
    }

    impl Stream for FlakySocket {
        type Item = Result<Message, WsError>;

        fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    impl Sink<Message> for FlakySocket {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
            let mut sent = self.sent.lock().unwrap();
            if sent.len() >= self.accept {
                return Err(WsError::ConnectionClosed);
            }
            sent.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_resubscribe_drops_the_session() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let socket = FlakySocket { sent: sent.clone(), accept: 1 };
        let config = CensusConfig::for_service("example");
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        cmd_tx.send(StreamCommand::Resubscribe).unwrap();

        let end = run_session(socket, &config, &mut cmd_rx, &signal_tx, &mut RecentKeys::new(4)).await;
        assert!(matches!(end, SessionEnd::Dropped(ref reason) if reason.starts_with("resubscribe send failed")));
        assert!(matches!(signal_rx.try_recv(), Ok(StreamSignal::Error(ref e)) if e.starts_with("resubscribe failed")));
        assert_eq!(
            *sent.lock().unwrap(),
            vec![Message::Text(config.subscribe_message().to_string().into())]
        );
    }

    #[tokio::test]
    async fn close_command_ends_the_session() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let socket = FlakySocket { sent: sent.clone(), accept: 2 };
        let config = CensusConfig::for_service("example");
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel();
        cmd_tx.send(StreamCommand::Close).unwrap();

        let end = run_session(socket, &config, &mut cmd_rx, &signal_tx, &mut RecentKeys::new(4)).await;
        assert!(matches!(end, SessionEnd::Shutdown));
        assert_eq!(sent.lock().unwrap().last(), Some(&Message::Close(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_or_close_ignores_resubscribe() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamCommand::Resubscribe).unwrap();
        assert!(!wait_or_close(Duration::from_millis(100), &mut rx).await);

        tx.send(StreamCommand::Close).unwrap();
        assert!(wait_or_close(Duration::from_secs(60), &mut rx).await);
    }
}
