use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{EdgeDirection, InterruptLine};
use crate::error::{BridgeError, Result};

/// An edge that survived debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub pin: u8,
    pub at: Instant,
}

/// Time-based bounce suppression.
///
/// An edge is accepted only if the line has been quiet for the whole window
/// since the previous edge, accepted or not. A burst whose gaps all stay
/// under the window therefore yields exactly one accepted edge.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_seen: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: None,
        }
    }

    pub fn accept(&mut self, at: Instant) -> bool {
        let quiet = match self.last_seen {
            Some(prev) => at.saturating_duration_since(prev) >= self.window,
            None => true,
        };
        self.last_seen = Some(at);
        quiet
    }
}

/// Wraps an interrupt line so that `on_edge` only sees debounced edges.
pub struct DebouncedEdgeSource {
    line: Box<dyn InterruptLine>,
    pin: u8,
    direction: EdgeDirection,
    armed: bool,
}

impl DebouncedEdgeSource {
    pub fn new(line: Box<dyn InterruptLine>, pin: u8, direction: EdgeDirection) -> Self {
        Self {
            line,
            pin,
            direction,
            armed: false,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm the line. `on_edge` runs on the line's dispatch thread, never on
    /// the network loop.
    pub fn register<F>(&mut self, bounce_window: Duration, mut on_edge: F) -> Result<()>
    where
        F: FnMut(Edge) + Send + 'static,
    {
        if self.armed {
            return Err(BridgeError::AlreadyRegistered { pin: self.pin });
        }

        let pin = self.pin;
        let mut debouncer = Debouncer::new(bounce_window);
        self.line.arm_interrupt(
            pin,
            self.direction,
            Box::new(move || {
                let at = Instant::now();
                if debouncer.accept(at) {
                    on_edge(Edge { pin, at });
                } else {
                    trace!("Bounce on pin {} suppressed", pin);
                }
            }),
        )?;

        self.armed = true;
        debug!(
            "Armed {:?} edge on pin {} (bounce window {:?})",
            self.direction, pin, bounce_window
        );
        Ok(())
    }
}
