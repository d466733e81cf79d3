//! External broker relay transport.
//!
//! Events are serialized into the self-describing envelope and relayed as
//! text frames over a WebSocket connection to the configured bootstrap
//! endpoint. A consumer loop receives frames for the announced consumer
//! group, decodes them through the bus codec, and fans them out to local
//! subscribers — on this transport, local delivery happens on
//! consumption, not at publish time, matching consumer-group semantics.
//!
//! Unknown event tags and malformed frames are logged and dropped without
//! affecting the connection. A broken connection reconnects with
//! exponential backoff and re-announces `{group, topics}`, so logical
//! subscriptions survive broker restarts.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crucible_core::{BoxedEvent, EventCodec, EventEnvelope, PluginError, PluginResult};

use crate::subscription::SubscriberSet;
use crate::transport::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Reconnection policy for the relay connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum consecutive failed attempts (`None` = retry forever).
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: None,
        }
    }
}

/// Configuration of the broker relay transport.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// WebSocket endpoint of the broker relay.
    pub bootstrap: String,
    /// Consumer group announced on connect.
    pub consumer_group: String,
    /// Topic used when `publish` is called without one.
    pub default_topic: String,
    /// Additional topics to consume.
    pub topics: Vec<String>,
    /// Per-event-tag topic overrides applied on publish.
    pub topic_overrides: HashMap<String, String>,
    /// Outbound frame buffer size.
    pub producer_buffer: usize,
    /// Reconnect behavior.
    pub reconnect: ReconnectPolicy,
}

impl BrokerConfig {
    /// Creates a config with defaults for everything but the endpoint.
    pub fn new(bootstrap: impl Into<String>) -> Self {
        Self {
            bootstrap: bootstrap.into(),
            consumer_group: "crucible".to_string(),
            default_topic: "crucible-events".to_string(),
            topics: Vec::new(),
            topic_overrides: HashMap::new(),
            producer_buffer: 1024,
            reconnect: ReconnectPolicy::default(),
        }
    }

    fn all_topics(&self) -> Vec<String> {
        let mut topics = vec![self.default_topic.clone()];
        for topic in self.topics.iter().chain(self.topic_overrides.values()) {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }
}

/// One relayed event: key is the plugin id (null for broadcast), value is
/// the self-describing envelope.
#[derive(Debug, Serialize, Deserialize)]
struct BrokerFrame {
    topic: String,
    key: Option<String>,
    value: EventEnvelope,
}

/// Consumer announcement sent after every (re)connect.
#[derive(Debug, Serialize)]
struct SubscribeFrame<'a> {
    action: &'static str,
    group: &'a str,
    topics: &'a [String],
}

/// Relay transport over an external broker endpoint.
pub struct BrokerTransport {
    config: BrokerConfig,
    codec: Arc<EventCodec>,
    outbound: OnceLock<mpsc::Sender<String>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerTransport {
    /// Creates the transport; the connection is opened by `initialize`.
    pub fn new(config: BrokerConfig, codec: Arc<EventCodec>) -> Self {
        Self {
            config,
            codec,
            outbound: OnceLock::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    fn topic_for<'a>(&'a self, explicit: Option<&'a str>, tag: &str) -> &'a str {
        explicit
            .or_else(|| self.config.topic_overrides.get(tag).map(String::as_str))
            .unwrap_or(&self.config.default_topic)
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn initialize(&self, local: Arc<SubscriberSet>) -> PluginResult<()> {
        let (ws_stream, _response) = connect_async(&self.config.bootstrap)
            .await
            .map_err(|e| {
                PluginError::transport(format!(
                    "broker connection failed: {}: {e}",
                    self.config.bootstrap
                ))
            })?;
        let (mut sink, source) = ws_stream.split();

        announce(&mut sink, &self.config).await?;
        info!(
            endpoint = %self.config.bootstrap,
            group = %self.config.consumer_group,
            "Connected to broker relay"
        );

        let (tx, rx) = mpsc::channel(self.config.producer_buffer);
        let _ = self.outbound.set(tx);

        let handle = tokio::spawn(run_relay_loop(
            sink,
            source,
            rx,
            self.cancel.clone(),
            local,
            Arc::clone(&self.codec),
            self.config.clone(),
        ));
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    async fn publish(&self, topic: Option<&str>, event: &BoxedEvent) -> PluginResult<()> {
        let envelope = self.codec.to_envelope(event)?;
        let frame = BrokerFrame {
            topic: self.topic_for(topic, event.type_tag()).to_string(),
            key: envelope.plugin_id.clone(),
            value: envelope,
        };
        let text = serde_json::to_string(&frame)
            .map_err(|e| PluginError::Serialization(e.to_string()))?;

        let tx = self
            .outbound
            .get()
            .ok_or_else(|| PluginError::transport("broker transport not initialized"))?;
        tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PluginError::transport("broker producer buffer full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                PluginError::transport("broker relay loop has exited")
            }
        })
    }

    async fn shutdown(&self) -> PluginResult<()> {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn announce(sink: &mut WsSink, config: &BrokerConfig) -> PluginResult<()> {
    let topics = config.all_topics();
    let frame = SubscribeFrame {
        action: "subscribe",
        group: &config.consumer_group,
        topics: &topics,
    };
    let text =
        serde_json::to_string(&frame).map_err(|e| PluginError::Serialization(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| PluginError::transport(format!("broker subscribe failed: {e}")))
}

/// Decodes one inbound frame and fans it out locally.
fn handle_inbound(local: &SubscriberSet, codec: &EventCodec, data: &[u8]) {
    let frame: BrokerFrame = match serde_json::from_slice(data) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Malformed broker frame, dropping");
            return;
        }
    };
    match codec.decode_envelope(&frame.value) {
        Ok(Some(event)) => {
            trace!(topic = %frame.topic, tag = event.type_tag(), "Broker event received");
            local.fan_out(Some(frame.topic.as_str()), &event);
        }
        Ok(None) => {
            warn!(tag = %frame.value.type_tag, "Unknown event type from broker, dropping");
        }
        Err(e) => {
            warn!(tag = %frame.value.type_tag, error = %e, "Undecodable broker event, dropping");
        }
    }
}

/// Runs the relay loop: outbound pump + consumer, with reconnection.
async fn run_relay_loop(
    sink: WsSink,
    source: WsSource,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    local: Arc<SubscriberSet>,
    codec: Arc<EventCodec>,
    config: BrokerConfig,
) {
    let mut current_sink = sink;
    let mut current_source = source;
    let mut retry_count = 0u32;
    let mut current_delay = config.reconnect.initial_delay;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush whatever publishers already handed over.
                while let Ok(text) = outbound_rx.try_recv() {
                    if current_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = current_sink.close().await;
                info!("Broker relay shut down");
                break;
            }

            Some(text) = outbound_rx.recv() => {
                if let Err(e) = current_sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "Failed to send frame to broker");
                }
            }

            msg = current_source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&local, &codec, text.as_bytes());
                        retry_count = 0;
                        current_delay = config.reconnect.initial_delay;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_inbound(&local, &codec, &data);
                        retry_count = 0;
                        current_delay = config.reconnect.initial_delay;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = current_sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Ok(Message::Frame(_))) | None => {
                        info!("Broker closed the relay connection");
                        match try_reconnect(&config, &mut retry_count, &mut current_delay).await {
                            Some(Ok((new_sink, new_source))) => {
                                current_sink = new_sink;
                                current_source = new_source;
                            }
                            Some(Err(())) => {}
                            None => break,
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Broker connection error");
                        match try_reconnect(&config, &mut retry_count, &mut current_delay).await {
                            Some(Ok((new_sink, new_source))) => {
                                current_sink = new_sink;
                                current_source = new_source;
                            }
                            Some(Err(())) => {}
                            None => break,
                        }
                    }
                }
            }
        }
    }
}

/// Attempts one reconnect with exponential backoff.
///
/// Returns `None` once the retry budget is exhausted; `Some(Err(()))`
/// after a failed attempt that may be retried on the next loop pass.
async fn try_reconnect(
    config: &BrokerConfig,
    retry_count: &mut u32,
    current_delay: &mut Duration,
) -> Option<Result<(WsSink, WsSource), ()>> {
    if let Some(max) = config.reconnect.max_retries
        && *retry_count >= max
    {
        error!(
            endpoint = %config.bootstrap,
            "Broker reconnect budget exhausted, giving up"
        );
        return None;
    }

    warn!(endpoint = %config.bootstrap, delay = ?current_delay, "Reconnecting to broker...");
    tokio::time::sleep(*current_delay).await;

    match connect_async(&config.bootstrap).await {
        Ok((stream, _)) => {
            let (mut sink, source) = stream.split();
            if let Err(e) = announce(&mut sink, config).await {
                warn!(error = %e, "Re-announce after reconnect failed");
                *retry_count += 1;
                return Some(Err(()));
            }
            info!(endpoint = %config.bootstrap, "Reconnected to broker");
            *retry_count = 0;
            *current_delay = config.reconnect.initial_delay;
            Some(Ok((sink, source)))
        }
        Err(e) => {
            warn!(endpoint = %config.bootstrap, error = %e, "Broker reconnect failed");
            *retry_count += 1;
            *current_delay = std::cmp::min(
                Duration::from_secs_f64(
                    current_delay.as_secs_f64() * config.reconnect.multiplier,
                ),
                config.reconnect.max_delay,
            );
            Some(Err(()))
        }
    }
}
