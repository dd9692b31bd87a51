//! In-process stand-in for the GPIO and touch drivers, used by `--test` and
//! by the test suite.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{info, warn};

use super::{EdgeCallback, EdgeDirection, InterruptLine, TouchSensor};
use crate::error::{BridgeError, Result};

#[derive(Clone, Default)]
pub struct SimulatedLine {
    callbacks: Arc<Mutex<HashMap<u8, EdgeCallback>>>,
    bitmask: Arc<AtomicU32>,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sensor that reports whatever was last passed to `set_bitmask`.
    pub fn sensor(&self) -> SimulatedSensor {
        SimulatedSensor {
            bitmask: Arc::clone(&self.bitmask),
        }
    }

    pub fn set_bitmask(&self, bitmask: u32) {
        self.bitmask.store(bitmask, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_armed(&self, pin: u8) -> bool {
        self.callbacks
            .lock()
            .map(|c| c.contains_key(&pin))
            .unwrap_or(false)
    }

    /// Fire an edge on `pin` from the calling thread. Returns false when
    /// nothing is armed there.
    pub fn trigger(&self, pin: u8) -> bool {
        let Ok(mut callbacks) = self.callbacks.lock() else {
            return false;
        };
        match callbacks.get_mut(&pin) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Turn each stdin line into an edge on `pin`, on a dedicated thread.
    /// A line may carry a touch mask (`3`, `0b11`, `0x3`).
    pub fn spawn_stdin_driver(&self, pin: u8) -> Result<()> {
        let line = self.clone();
        thread::Builder::new()
            .name("sim-interrupts".into())
            .spawn(move || {
                info!("Test mode: press Enter (optionally with a touch mask) to fire pin {}", pin);
                for input in std::io::stdin().lock().lines() {
                    let Ok(input) = input else { break };
                    let input = input.trim();
                    if !input.is_empty() {
                        match parse_mask(input) {
                            Some(mask) => line.set_bitmask(mask),
                            None => {
                                warn!("Ignoring unparsable touch mask '{}'", input);
                                continue;
                            }
                        }
                    }
                    if !line.trigger(pin) {
                        warn!("Edge on pin {} before it was armed", pin);
                    }
                }
            })
            .map(|_| ())
            .map_err(|e| BridgeError::HardwareInit(format!("failed to start simulator: {e}")))
    }
}

impl InterruptLine for SimulatedLine {
    fn arm_interrupt(
        &mut self,
        pin: u8,
        _direction: EdgeDirection,
        callback: EdgeCallback,
    ) -> Result<()> {
        let mut callbacks = self
            .callbacks
            .lock()
            .map_err(|_| BridgeError::HardwareInit("simulator lock poisoned".into()))?;
        if callbacks.contains_key(&pin) {
            return Err(BridgeError::AlreadyRegistered { pin });
        }
        callbacks.insert(pin, callback);
        Ok(())
    }
}

pub struct SimulatedSensor {
    bitmask: Arc<AtomicU32>,
}

impl TouchSensor for SimulatedSensor {
    fn read_bitmask(&mut self) -> Result<u32> {
        Ok(self.bitmask.load(Ordering::SeqCst))
    }
}

fn parse_mask(input: &str) -> Option<u32> {
    if let Some(bin) = input.strip_prefix("0b") {
        u32::from_str_radix(bin, 2).ok()
    } else if let Some(hex) = input.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else {
        input.parse().ok()
    }
}
