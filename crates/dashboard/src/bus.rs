//! Message-bus adapter: the [`Bus`] interface handed to the dispatcher and
//! session, its MQTT implementation, and the connection event loop.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{MqttConfig, Protocol};
use crate::error::BusError;
use crate::reconciler::Reconciler;

/// Requests the client may queue while the event loop is busy or the broker
/// is unreachable. Once full, publishes are dropped with an error.
const REQUEST_CAPACITY: usize = 64;

/// Pause after a connection error before polling the event loop again.
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Quality of service for everything the dashboard sends or subscribes to.
/// Fire-and-forget, like the browser client it replaces.
const QOS: QoS = QoS::AtMostOnce;

/// Publish/subscribe interface over a persistent connection. Every call is
/// non-blocking: it hands the request to the transport and returns.
pub trait Bus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
    fn subscribe(&self, topic: &str) -> Result<(), BusError>;
    fn close(&self) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// MQTT implementation
// ---------------------------------------------------------------------------

pub struct MqttBus {
    client: AsyncClient,
    closed: AtomicBool,
}

impl MqttBus {
    /// Build the client and its event loop. Nothing touches the network
    /// until the event loop is polled.
    pub fn connect(cfg: &MqttConfig) -> (Self, EventLoop) {
        let (client, eventloop) = AsyncClient::new(mqtt_options(cfg), REQUEST_CAPACITY);
        let bus = Self {
            client,
            closed: AtomicBool::new(false),
        };
        (bus, eventloop)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Bus for MqttBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.ensure_open()?;
        self.client.try_publish(topic, QOS, false, payload)?;
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        self.client.try_subscribe(topic, QOS)?;
        Ok(())
    }

    fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client.try_disconnect()?;
        Ok(())
    }
}

pub(crate) fn mqtt_options(cfg: &MqttConfig) -> MqttOptions {
    let mut opts = match cfg.protocol {
        Protocol::Mqtt => MqttOptions::new(cfg.client_id.as_str(), cfg.host.as_str(), cfg.port),
        Protocol::Ws | Protocol::Wss => {
            let scheme = if cfg.protocol == Protocol::Wss { "wss" } else { "ws" };
            let url = format!("{scheme}://{}:{}{}", cfg.host, cfg.port, cfg.ws_path);
            let mut opts = MqttOptions::new(cfg.client_id.as_str(), url, cfg.port);
            opts.set_transport(if cfg.protocol == Protocol::Wss {
                Transport::wss_with_default_config()
            } else {
                Transport::Ws
            });
            opts
        }
    };
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_sec));
    opts
}

// ---------------------------------------------------------------------------
// Subscription + event loop
// ---------------------------------------------------------------------------

/// Subscribe every topic in the reconciler's channel table. Failures are
/// logged per topic; the rest still go out.
pub fn subscribe_all(bus: &dyn Bus, reconciler: &Reconciler) -> usize {
    let table = reconciler.channels();
    let mut ok = 0;
    for channel in table.channels() {
        let topic = table.topic(channel);
        match bus.subscribe(topic) {
            Ok(()) => {
                debug!(topic, "subscribed");
                ok += 1;
            }
            Err(e) => warn!(topic, error = %e, "subscribe failed"),
        }
    }
    ok
}

/// Drive the MQTT connection until a disconnect is sent or the reconciler is
/// unmounted. Reconnecting is left to rumqttc: after an error the loop just
/// pauses and polls again.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    bus: Arc<dyn Bus>,
    reconciler: Arc<Reconciler>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                debug!(topic = %p.topic, bytes = p.payload.len(), "mqtt message");
                reconciler.apply_message(&p.topic, &p.payload).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                reconciler.set_connected(true).await;
                let n = subscribe_all(bus.as_ref(), &reconciler);
                info!(topics = n, "subscriptions requested");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("mqtt disconnected by broker");
                reconciler.set_connected(false).await;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("mqtt disconnect sent, event loop stopping");
                reconciler.set_connected(false).await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if !reconciler.is_mounted() {
                    debug!(error = %e, "event loop stopping after unmount");
                    break;
                }
                error!(error = %e, "mqtt error, retrying");
                reconciler.set_connected(false).await;
                reconciler.record_error(format!("mqtt error: {e}")).await;
                sleep(RETRY_PAUSE).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
