//! WebSocket Quote Source
//!
//! [`QuoteSource`] adapter for the Alpaca-style JSON market data stream.
//!
//! # Handshake
//!
//! 1. Connect and wait for `{"T":"success","msg":"connected"}`
//! 2. If credentials are configured, send `auth` and wait for `authenticated`
//! 3. Send `subscribe` for quotes and wait for a `subscription` message
//!    listing every requested symbol
//!
//! The whole handshake runs under a single timeout. Quotes that arrive
//! while it is in progress are queued, not dropped.
//!
//! # Liveness
//!
//! The server is pinged on a fixed interval (see [`Heartbeat`]); an
//! unanswered ping past the pong timeout ends the stream with a transport
//! error. Each `subscribe` call opens a fresh connection, so resubscription
//! after a failure is just another `subscribe`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec::JsonCodec;
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::messages::{AuthRequest, StreamMessage, SubscriptionRequest, SuccessKind};
use crate::application::ports::{QuoteEvent, QuoteSource, QuoteSourceError};
use crate::domain::quotes::InstrumentId;
use crate::infrastructure::config::{Credentials, StreamingConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Configuration
// =============================================================================

/// WebSocket adapter configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Stream URL.
    pub url: String,
    /// Credentials; authentication is skipped when absent.
    pub credentials: Option<Credentials>,
    /// Upper bound on connect + auth + subscribe.
    pub handshake_timeout: Duration,
    /// Ping/pong timing.
    pub heartbeat: HeartbeatConfig,
}

impl WebSocketConfig {
    /// Configuration from the `streaming` section.
    #[must_use]
    pub fn from_streaming(streaming: &StreamingConfig) -> Self {
        Self {
            url: streaming.url.clone(),
            credentials: streaming.credentials(),
            handshake_timeout: streaming.handshake_timeout(),
            heartbeat: HeartbeatConfig::from_settings(&streaming.heartbeat),
        }
    }
}

// =============================================================================
// Source
// =============================================================================

struct Connection {
    ws: WsStream,
    heartbeat: Heartbeat,
    ticker: Interval,
}

enum Wake {
    Frame(Option<Result<Message, tungstenite::Error>>),
    Tick,
}

/// Handshake stage being awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connected,
    Authenticated,
    Subscribed,
}

/// Quote source backed by a WebSocket connection.
pub struct WebSocketQuoteSource {
    config: WebSocketConfig,
    codec: JsonCodec,
    connection: Option<Connection>,
    subscribed: Vec<InstrumentId>,
    pending: VecDeque<Result<QuoteEvent, QuoteSourceError>>,
}

impl std::fmt::Debug for WebSocketQuoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketQuoteSource")
            .field("url", &self.config.url)
            .field("connected", &self.connection.is_some())
            .field("subscribed", &self.subscribed.len())
            .finish_non_exhaustive()
    }
}

impl WebSocketQuoteSource {
    /// Create an unconnected source.
    #[must_use]
    pub const fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            connection: None,
            subscribed: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn handshake(
        &mut self,
        instruments: &[InstrumentId],
    ) -> Result<WsStream, QuoteSourceError> {
        let (mut ws, _response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| QuoteSourceError::ConnectionFailed {
                message: e.to_string(),
            })?;
        self.await_stage(&mut ws, Stage::Connected, instruments).await?;

        if let Some(credentials) = &self.config.credentials {
            let request = AuthRequest::new(credentials.api_key(), credentials.api_secret());
            send_request(self.codec, &mut ws, &request).await?;
            self.await_stage(&mut ws, Stage::Authenticated, instruments).await?;
            tracing::info!("Quote stream authenticated");
        }

        let request = SubscriptionRequest::subscribe(instruments);
        send_request(self.codec, &mut ws, &request).await?;
        self.await_stage(&mut ws, Stage::Subscribed, instruments).await?;
        Ok(ws)
    }

    /// Read frames until `stage` is confirmed. Quotes seen on the way are
    /// queued.
    async fn await_stage(
        &mut self,
        ws: &mut WsStream,
        stage: Stage,
        instruments: &[InstrumentId],
    ) -> Result<(), QuoteSourceError> {
        loop {
            let text = match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(data))) => {
                    ws.send(Message::Pong(data)).await.map_err(|e| {
                        QuoteSourceError::ConnectionFailed {
                            message: e.to_string(),
                        }
                    })?;
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(QuoteSourceError::ConnectionFailed {
                        message: format!("connection closed while waiting for {stage:?}"),
                    });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(QuoteSourceError::ConnectionFailed {
                        message: e.to_string(),
                    });
                }
            };

            let messages = self
                .codec
                .decode(&text)
                .map_err(|e| QuoteSourceError::ConnectionFailed {
                    message: format!("malformed handshake frame: {e}"),
                })?;

            let mut confirmed = false;
            for message in messages {
                match (stage, message) {
                    (Stage::Connected, StreamMessage::Success(s))
                        if s.msg == SuccessKind::Connected =>
                    {
                        confirmed = true;
                    }
                    (Stage::Authenticated, StreamMessage::Success(s))
                        if s.msg == SuccessKind::Authenticated =>
                    {
                        confirmed = true;
                    }
                    (Stage::Subscribed, StreamMessage::Subscription(sub)) => {
                        let missing: Vec<_> = instruments
                            .iter()
                            .filter(|id| !sub.quotes.contains(id))
                            .cloned()
                            .collect();
                        if !missing.is_empty() {
                            return Err(QuoteSourceError::SubscriptionRejected {
                                message: format!("not subscribed: {}", missing.join(", ")),
                            });
                        }
                        tracing::debug!(quotes = sub.quotes.len(), "Subscription confirmed");
                        confirmed = true;
                    }
                    (_, StreamMessage::Error(error)) => {
                        tracing::error!(
                            code = error.code,
                            msg = %error.msg,
                            "Stream rejected handshake"
                        );
                        let message = error.to_string();
                        return Err(if error.is_auth_error() {
                            QuoteSourceError::AuthenticationFailed { message }
                        } else if error.is_subscription_error() {
                            QuoteSourceError::SubscriptionRejected { message }
                        } else {
                            QuoteSourceError::ConnectionFailed { message }
                        });
                    }
                    (_, StreamMessage::Quote(quote)) => self.pending.push_back(Ok(quote.into())),
                    (_, other) => tracing::trace!(kind = ?other, "Ignoring handshake message"),
                }
            }
            if confirmed {
                return Ok(());
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let elements = match self.codec.split_frame(text) {
            Ok(elements) => elements,
            Err(e) => {
                self.pending.push_back(Err(QuoteSourceError::MalformedEvent {
                    message: e.to_string(),
                }));
                return;
            }
        };

        for element in elements {
            match self.codec.decode_message(element) {
                Ok(StreamMessage::Quote(quote)) => self.pending.push_back(Ok(quote.into())),
                Ok(StreamMessage::Error(error)) => {
                    tracing::warn!(code = error.code, msg = %error.msg, "Stream error message");
                }
                Ok(StreamMessage::Subscription(sub)) => {
                    tracing::debug!(quotes = sub.quotes.len(), "Subscription update");
                }
                Ok(other) => tracing::trace!(kind = ?other, "Ignoring stream message"),
                Err(e) => self.pending.push_back(Err(QuoteSourceError::MalformedEvent {
                    message: e.to_string(),
                })),
            }
        }
    }

    fn lose_connection(&mut self, message: String) -> QuoteSourceError {
        tracing::warn!(error = %message, "Quote stream connection lost");
        self.connection = None;
        QuoteSourceError::Transport { message }
    }
}

async fn send_request<T: serde::Serialize + Sync>(
    codec: JsonCodec,
    ws: &mut WsStream,
    request: &T,
) -> Result<(), QuoteSourceError> {
    let json = codec
        .encode(request)
        .map_err(|e| QuoteSourceError::ConnectionFailed {
            message: format!("failed to encode request: {e}"),
        })?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| QuoteSourceError::ConnectionFailed {
            message: format!("failed to send request: {e}"),
        })
}

#[async_trait]
impl QuoteSource for WebSocketQuoteSource {
    async fn subscribe(&mut self, instruments: &[InstrumentId]) -> Result<(), QuoteSourceError> {
        if self.connection.is_some() {
            self.close().await;
        }
        self.pending.clear();

        tracing::info!(
            url = %self.config.url,
            instruments = instruments.len(),
            "Connecting to quote stream"
        );
        let timeout = self.config.handshake_timeout;
        let ws = tokio::time::timeout(timeout, self.handshake(instruments))
            .await
            .map_err(|_| QuoteSourceError::ConnectionFailed {
                message: format!("handshake timed out after {}s", timeout.as_secs()),
            })??;

        let heartbeat = Heartbeat::new(self.config.heartbeat);
        let period = heartbeat.ping_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.subscribed = instruments.to_vec();
        self.connection = Some(Connection {
            ws,
            heartbeat,
            ticker,
        });
        tracing::info!(instruments = instruments.len(), "Quote stream subscribed");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<QuoteEvent, QuoteSourceError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let conn = self.connection.as_mut()?;

            let wake = tokio::select! {
                frame = conn.ws.next() => Wake::Frame(frame),
                _ = conn.ticker.tick() => Wake::Tick,
            };

            match wake {
                Wake::Tick => match conn.heartbeat.on_tick() {
                    HeartbeatAction::SendPing => {
                        if let Err(e) = conn.ws.send(Message::Ping(vec![].into())).await {
                            return Some(Err(self.lose_connection(e.to_string())));
                        }
                    }
                    HeartbeatAction::Wait => {}
                    HeartbeatAction::Timeout => {
                        return Some(Err(self.lose_connection("heartbeat timeout".to_string())));
                    }
                },
                Wake::Frame(Some(Ok(message))) => {
                    conn.heartbeat.record_activity();
                    match message {
                        Message::Text(text) => self.handle_text(&text),
                        Message::Ping(data) => {
                            if let Err(e) = conn.ws.send(Message::Pong(data)).await {
                                return Some(Err(self.lose_connection(e.to_string())));
                            }
                        }
                        Message::Close(frame) => {
                            tracing::info!(frame = ?frame, "Server closed quote stream");
                            self.connection = None;
                            return None;
                        }
                        _ => {}
                    }
                }
                Wake::Frame(Some(Err(e))) => {
                    return Some(Err(self.lose_connection(e.to_string())));
                }
                Wake::Frame(None) => {
                    tracing::info!("Quote stream ended");
                    self.connection = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        self.pending.clear();
        let Some(mut conn) = self.connection.take() else {
            return;
        };

        let codec = self.codec;
        let request = SubscriptionRequest::unsubscribe(&self.subscribed);
        let shutdown = async {
            let json = codec.encode(&request).map_err(|e| e.to_string())?;
            conn.ws
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| e.to_string())?;
            conn.ws.close(None).await.map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        };

        match tokio::time::timeout(self.config.handshake_timeout, shutdown).await {
            Ok(Ok(())) => tracing::info!("Quote stream unsubscribed and closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "Quote stream close was not clean"),
            Err(_) => tracing::warn!("Timed out closing quote stream"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    type ServerStream = WebSocketStream<TcpStream>;

    fn config(url: String, credentials: Option<Credentials>) -> WebSocketConfig {
        WebSocketConfig {
            url,
            credentials,
            handshake_timeout: Duration::from_secs(5),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    async fn send(ws: &mut ServerStream, json: &str) {
        ws.send(Message::Text(json.to_string().into())).await.unwrap();
    }

    async fn recv_json(ws: &mut ServerStream) -> serde_json::Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    /// Start a one-connection server running `script`.
    async fn serve<F, Fut>(script: F) -> (String, JoinHandle<()>)
    where
        F: FnOnce(ServerStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        });
        (url, handle)
    }

    #[tokio::test]
    async fn full_session_streams_quotes_and_unsubscribes() {
        let (url, server) = serve(|mut ws| async move {
            send(&mut ws, r#"[{"T":"success","msg":"connected"}]"#).await;

            let auth = recv_json(&mut ws).await;
            assert_eq!(auth["action"], "auth");
            assert_eq!(auth["key"], "k");
            send(&mut ws, r#"[{"T":"success","msg":"authenticated"}]"#).await;

            let sub = recv_json(&mut ws).await;
            assert_eq!(sub["action"], "subscribe");
            send(
                &mut ws,
                r#"[{"T":"subscription","quotes":["AAA","BBB"]},{"T":"q","S":"AAA","bp":6.0,"ap":6.2}]"#,
            )
            .await;
            send(
                &mut ws,
                r#"[{"T":"q","S":"BBB","bp":"bad"},{"T":"t","S":"BBB"},{"T":"q","S":"BBB","bp":1.8,"as":2}]"#,
            )
            .await;

            let unsub = recv_json(&mut ws).await;
            assert_eq!(unsub["action"], "unsubscribe");
            assert_eq!(unsub["quotes"], serde_json::json!(["AAA", "BBB"]));
        })
        .await;

        let credentials = Credentials::new("k".into(), "s".into());
        let mut source = WebSocketQuoteSource::new(config(url, Some(credentials)));
        source
            .subscribe(&["AAA".to_string(), "BBB".to_string()])
            .await
            .unwrap();
        assert!(source.is_connected());

        let first = source.next_event().await.unwrap().unwrap();
        assert_eq!(first.instrument_id, "AAA");
        assert_eq!(first.ask_price, Some(dec!(6.2)));

        let malformed = source.next_event().await.unwrap().unwrap_err();
        assert!(malformed.is_recoverable());

        let second = source.next_event().await.unwrap().unwrap();
        assert_eq!(second.instrument_id, "BBB");
        assert_eq!(second.ask_price, None);
        assert_eq!(second.ask_size, Some(dec!(2)));

        source.close().await;
        assert!(!source.is_connected());
        assert!(source.next_event().await.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn auth_rejection_is_reported() {
        let (url, server) = serve(|mut ws| async move {
            send(&mut ws, r#"[{"T":"success","msg":"connected"}]"#).await;
            let _auth = recv_json(&mut ws).await;
            send(&mut ws, r#"[{"T":"error","code":402,"msg":"auth failed"}]"#).await;
        })
        .await;

        let credentials = Credentials::new("k".into(), "wrong".into());
        let mut source = WebSocketQuoteSource::new(config(url, Some(credentials)));
        let err = source.subscribe(&["AAA".to_string()]).await.unwrap_err();

        assert!(matches!(err, QuoteSourceError::AuthenticationFailed { .. }));
        assert!(!source.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn partial_subscription_is_rejected() {
        let (url, server) = serve(|mut ws| async move {
            send(&mut ws, r#"[{"T":"success","msg":"connected"}]"#).await;
            let _sub = recv_json(&mut ws).await;
            send(&mut ws, r#"[{"T":"subscription","quotes":["AAA"]}]"#).await;
        })
        .await;

        let mut source = WebSocketQuoteSource::new(config(url, None));
        let err = source
            .subscribe(&["AAA".to_string(), "ZZZ".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QuoteSourceError::SubscriptionRejected { message } if message.contains("ZZZ")
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn symbol_limit_rejects_subscription() {
        let (url, server) = serve(|mut ws| async move {
            send(&mut ws, r#"[{"T":"success","msg":"connected"}]"#).await;
            let _sub = recv_json(&mut ws).await;
            send(&mut ws, r#"[{"T":"error","code":405,"msg":"symbol limit exceeded"}]"#).await;
        })
        .await;

        let mut source = WebSocketQuoteSource::new(config(url, None));
        let err = source.subscribe(&["AAA".to_string()]).await.unwrap_err();

        assert!(matches!(
            err,
            QuoteSourceError::SubscriptionRejected { message } if message.contains("405")
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn other_handshake_errors_fail_the_connection() {
        let (url, server) = serve(|mut ws| async move {
            send(&mut ws, r#"[{"T":"success","msg":"connected"}]"#).await;
            let _sub = recv_json(&mut ws).await;
            send(&mut ws, r#"[{"T":"error","code":406,"msg":"connection limit exceeded"}]"#).await;
        })
        .await;

        let mut source = WebSocketQuoteSource::new(config(url, None));
        let err = source.subscribe(&["AAA".to_string()]).await.unwrap_err();

        assert!(matches!(err, QuoteSourceError::ConnectionFailed { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_close_ends_the_stream() {
        let (url, server) = serve(|mut ws| async move {
            send(&mut ws, r#"[{"T":"success","msg":"connected"}]"#).await;
            let _sub = recv_json(&mut ws).await;
            send(&mut ws, r#"[{"T":"subscription","quotes":["AAA"]}]"#).await;
            let _ = ws.close(None).await;
        })
        .await;

        let mut source = WebSocketQuoteSource::new(config(url, None));
        source.subscribe(&["AAA".to_string()]).await.unwrap();

        assert!(source.next_event().await.is_none());
        assert!(!source.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_refused_fails_subscription() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut source = WebSocketQuoteSource::new(config(url, None));
        let err = source.subscribe(&["AAA".to_string()]).await.unwrap_err();
        assert!(matches!(err, QuoteSourceError::ConnectionFailed { .. }));
    }
}
