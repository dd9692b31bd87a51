use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::command::decoder::TouchDecoder;
use crate::command::mux::{CommandMux, ToggleState};
use crate::config::{BridgeMode, Config, ReconnectConfig};
use crate::error::{BridgeError, Result};
use crate::hardware::debounce::DebouncedEdgeSource;
use crate::hardware::{Hardware, HardwareEvent, TouchSensor};
use crate::ws::client::Session;
use crate::ws::{SessionEvent, SessionHooks, SessionState};

/// Edges buffered between the interrupt context and the network loop.
const EVENT_QUEUE: usize = 32;

/// Logs every session lifecycle event.
pub struct LoggingHooks;

impl SessionHooks for LoggingHooks {
    fn on_connect_success(&mut self, url: &str) {
        info!("Connected to {}", url);
    }

    fn on_connect_error(&mut self, cause: &BridgeError) {
        error!("Connection error: {}", cause);
    }

    fn on_connection_close(&mut self) {
        info!("Connection closed");
    }

    fn on_message(&mut self, frame: &str) {
        info!("Server: {}", frame);
    }
}

enum Pumped {
    Shutdown,
    Disconnected(BridgeError),
}

/// Wires the debounced edge source, the command mux and the session together.
///
/// The network loop in `run` is the sole owner of the session and the mux.
/// Edges reach it through a bounded channel filled from the interrupt
/// context with `try_send`.
pub struct Bridge<H: SessionHooks> {
    url: String,
    session: Session<H>,
    mux: CommandMux,
    edges: DebouncedEdgeSource,
    sensor: Option<Box<dyn TouchSensor>>,
    debounce: Duration,
    reconnect: ReconnectConfig,
    events_tx: mpsc::Sender<HardwareEvent>,
    events_rx: mpsc::Receiver<HardwareEvent>,
    /// When the current connection came up. Edges older than this fired
    /// while disconnected.
    connected_at: Option<Instant>,
}

impl Bridge<LoggingHooks> {
    pub fn new(config: &Config, hardware: Hardware) -> Result<Self> {
        Self::with_hooks(config, hardware, LoggingHooks)
    }
}

impl<H: SessionHooks> Bridge<H> {
    pub fn with_hooks(config: &Config, hardware: Hardware, hooks: H) -> Result<Self> {
        let mux = match config.hardware.mode {
            BridgeMode::Touch => {
                CommandMux::direct(TouchDecoder::new(config.hardware.keymap.clone()))
            }
            BridgeMode::Toggle => CommandMux::toggle(
                ToggleState::new(config.hardware.toggle_states.clone())
                    .map_err(BridgeError::Config)?,
            ),
        };
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        Ok(Self {
            url: config.server.url.clone(),
            session: Session::from_config(&config.server, hooks),
            mux,
            edges: DebouncedEdgeSource::new(
                hardware.line,
                config.hardware.pin,
                config.hardware.edge,
            ),
            sensor: hardware.sensor,
            debounce: config.hardware.debounce,
            reconnect: config.reconnect.clone(),
            events_tx,
            events_rx,
            connected_at: None,
        })
    }

    /// Connect, forward edges while connected, and reconnect with a doubling
    /// backoff until `shutdown` resolves or the retry budget is spent.
    pub async fn run<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut backoff = self.reconnect.initial_backoff;
        let mut failures: u32 = 0;

        loop {
            info!("Connecting to {}", self.url);
            let url = self.url.clone();
            let connected = tokio::select! {
                res = self.session.connect(&url) => res,
                _ = shutdown.as_mut() => {
                    self.session.abort();
                    info!("Shutdown requested while connecting");
                    return Ok(());
                }
            };

            let cause = match connected {
                Ok(()) => {
                    failures = 0;
                    backoff = self.reconnect.initial_backoff;
                    self.connected_at = Some(Instant::now());
                    self.drop_stale_edges();
                    if !self.edges.is_armed() {
                        if let Err(e) = self.arm_edges() {
                            if let Err(close) = self.session.close().await {
                                debug!("Close skipped: {}", close);
                            }
                            return Err(e);
                        }
                    }
                    match self.pump(&mut shutdown).await {
                        Pumped::Shutdown => {
                            info!("Shutdown requested, closing connection");
                            if let Err(e) = self.session.close().await {
                                debug!("Close skipped: {}", e);
                            }
                            return Ok(());
                        }
                        Pumped::Disconnected(cause) => cause,
                    }
                }
                Err(cause) => cause,
            };

            failures += 1;
            if let Some(max) = self.reconnect.max_attempts {
                if failures > max {
                    error!("Giving up after {} failed attempt(s)", failures);
                    return Err(cause);
                }
            }

            warn!("Disconnected ({}). Reconnecting in {:?}", cause, backoff);
            if self.idle(backoff, &mut shutdown).await {
                info!("Shutdown requested while disconnected");
                return Ok(());
            }
            backoff = (backoff * 2).min(self.reconnect.max_backoff);
        }
    }

    /// Arm the edge source. The callback runs in the interrupt context: it
    /// reads the touch state fresh and hands the event off without blocking.
    fn arm_edges(&mut self) -> Result<()> {
        let tx = self.events_tx.clone();
        let mut sensor = self.sensor.take();

        self.edges.register(self.debounce, move |edge| {
            let bitmask = match sensor.as_mut() {
                Some(sensor) => match sensor.read_bitmask() {
                    Ok(mask) => Some(mask),
                    Err(e) => {
                        warn!("Dropping edge on pin {}: {}", edge.pin, e);
                        return;
                    }
                },
                None => None,
            };
            let event = HardwareEvent {
                pin: edge.pin,
                at: edge.at,
                bitmask,
            };
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Event queue full, dropping edge on pin {}", edge.pin)
                }
                Err(TrySendError::Closed(_)) => debug!("Bridge stopped, dropping edge"),
            }
        })?;

        info!("Listening for edges on pin {}", self.edges.pin());
        Ok(())
    }

    /// Discard edges queued while the session was connecting.
    fn drop_stale_edges(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            debug!("Dropping edge on pin {} from before the connection", event.pin);
        }
    }

    async fn pump<S>(&mut self, shutdown: &mut Pin<&mut S>) -> Pumped
    where
        S: Future<Output = ()>,
    {
        loop {
            tokio::select! {
                event = self.session.next_event() => match event {
                    SessionEvent::Message(_) => {}
                    SessionEvent::Closed => return Pumped::Disconnected(BridgeError::ConnectionClosed),
                    SessionEvent::Failed(e) => return Pumped::Disconnected(e),
                },
                Some(event) = self.events_rx.recv() => {
                    if let Err(e) = self.forward(event).await {
                        if self.session.state() != SessionState::Connected {
                            return Pumped::Disconnected(e);
                        }
                    }
                }
                _ = shutdown.as_mut() => return Pumped::Shutdown,
            }
        }
    }

    /// Send every command for one edge, in order. Failures are logged and
    /// the first one is returned; they never reach the interrupt context.
    async fn forward(&mut self, event: HardwareEvent) -> Result<()> {
        if self.session.state() != SessionState::Connected {
            debug!("Not connected, dropping edge on pin {}", event.pin);
            return Ok(());
        }
        if self.connected_at.is_some_and(|up| event.at < up) {
            debug!("Dropping edge on pin {} from before the connection", event.pin);
            return Ok(());
        }

        debug!(
            "Edge on pin {} handled {:?} after it fired",
            event.pin,
            event.at.elapsed()
        );
        let mut first_error = None;
        for command in self.mux.commands_for(&event) {
            info!("Sending {}={}", command.cmd, command.val);
            if let Err(e) = self.session.send(&command).await {
                warn!("Failed to send {}={}: {}", command.cmd, command.val, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Sit out the backoff, discarding edges that arrive meanwhile. Returns
    /// true if shutdown was requested.
    async fn idle<S>(&mut self, delay: Duration, shutdown: &mut Pin<&mut S>) -> bool
    where
        S: Future<Output = ()>,
    {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                Some(event) = self.events_rx.recv() => {
                    debug!("Disconnected, dropping edge on pin {}", event.pin);
                }
                _ = shutdown.as_mut() => return true,
            }
        }
    }
}
