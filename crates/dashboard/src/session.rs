//! One mounted dashboard: owns the bus connection, its event loop task, and
//! the metric poller for as long as the view is alive.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{self, Bus, MqttBus};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::mqtt::ChannelTable;
use crate::reconciler::Reconciler;
use crate::rest::{self, RestClient};

/// How long unmount waits for the event loop to flush the disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Session {
    reconciler: Arc<Reconciler>,
    dispatcher: Dispatcher,
    bus: Arc<dyn Bus>,
    event_loop: JoinHandle<()>,
    poller: JoinHandle<()>,
}

impl Session {
    /// Mount: build fresh state, open the broker connection, start polling.
    /// Must be called from inside a tokio runtime.
    pub fn mount(config: &Config) -> Result<Self> {
        config.validate().context("refusing to mount with invalid config")?;

        let channels = Arc::new(config.channels.table());
        let reconciler = Arc::new(Reconciler::new(channels));

        let (mqtt, eventloop) = MqttBus::connect(&config.mqtt);
        let bus: Arc<dyn Bus> = Arc::new(mqtt);
        let event_loop = tokio::spawn(bus::run_event_loop(
            eventloop,
            Arc::clone(&bus),
            Arc::clone(&reconciler),
        ));

        let rest = RestClient::new(&config.rest.base_url);
        info!(
            broker = %config.mqtt.host,
            port = config.mqtt.port,
            protocol = ?config.mqtt.protocol,
            rest = %config.rest.base_url,
            "mounting dashboard session"
        );

        Ok(Self::start(
            reconciler,
            bus,
            event_loop,
            rest,
            config.rest.poll_interval(),
        ))
    }

    /// Wire an already-connected bus and its running event loop into a
    /// session and start the poller.
    pub fn start(
        reconciler: Arc<Reconciler>,
        bus: Arc<dyn Bus>,
        event_loop: JoinHandle<()>,
        rest: RestClient,
        poll_interval: Option<Duration>,
    ) -> Self {
        let poller = tokio::spawn(rest::run_poller(
            rest,
            Arc::clone(&reconciler),
            poll_interval,
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&reconciler), Arc::clone(&bus));
        Self {
            reconciler,
            dispatcher,
            bus,
            event_loop,
            poller,
        }
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn channels(&self) -> &ChannelTable {
        self.reconciler.channels()
    }

    /// Tear down: stop accepting writes from fetches and messages, stop the
    /// poll timer, and close the bus. Fetches already in flight are left to
    /// finish and are discarded.
    pub async fn unmount(self) {
        self.reconciler.unmount();
        self.poller.abort();

        if let Err(e) = self.bus.close() {
            warn!(error = %e, "bus close failed");
        }

        let mut event_loop = self.event_loop;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut event_loop)
            .await
            .is_err()
        {
            warn!("event loop did not stop in time, aborting");
            event_loop.abort();
        }
        info!("dashboard session unmounted");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
