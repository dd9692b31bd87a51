pub mod debounce;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod sim;

use std::str::FromStr;
use std::time::Instant;

use crate::config::{BridgeMode, Config};
use crate::error::Result;

/// Which transition on the line raises an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Rising,
    Falling,
    Both,
}

impl FromStr for EdgeDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rising" => Ok(Self::Rising),
            "falling" => Ok(Self::Falling),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown edge direction '{other}'")),
        }
    }
}

/// Invoked from the capability's own dispatch thread.
pub type EdgeCallback = Box<dyn FnMut() + Send + 'static>;

/// Raw interrupt registration on a GPIO line.
pub trait InterruptLine: Send {
    fn arm_interrupt(
        &mut self,
        pin: u8,
        direction: EdgeDirection,
        callback: EdgeCallback,
    ) -> Result<()>;
}

/// A capacitive sensor that reports one bit per pad.
pub trait TouchSensor: Send {
    fn read_bitmask(&mut self) -> Result<u32>;
}

/// A debounced edge, as handed from the interrupt context to the network loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareEvent {
    pub pin: u8,
    pub at: Instant,
    /// Touch state read right after the edge; `None` for a plain button.
    pub bitmask: Option<u32>,
}

/// The opened hardware capabilities.
pub struct Hardware {
    pub line: Box<dyn InterruptLine>,
    pub sensor: Option<Box<dyn TouchSensor>>,
}

/// Bring up the interrupt line (and the touch sensor in touch mode).
///
/// Fails with `HardwareInit` when the backend cannot be opened; the caller
/// must not go on to connect.
pub fn open(config: &Config, test_mode: bool) -> Result<Hardware> {
    let touch = config.hardware.mode == BridgeMode::Touch;
    if test_mode {
        let line = sim::SimulatedLine::new();
        line.spawn_stdin_driver(config.hardware.pin)?;
        let sensor: Option<Box<dyn TouchSensor>> = if touch {
            Some(Box::new(line.sensor()))
        } else {
            None
        };
        return Ok(Hardware {
            line: Box::new(line),
            sensor,
        });
    }
    open_device(config, touch)
}

#[cfg(feature = "rpi")]
fn open_device(config: &Config, touch: bool) -> Result<Hardware> {
    let line = rpi::GpioLine::new()?;
    let sensor: Option<Box<dyn TouchSensor>> = if touch {
        Some(Box::new(rpi::Mpr121::open(config.hardware.i2c_address)?))
    } else {
        None
    };
    Ok(Hardware {
        line: Box::new(line),
        sensor,
    })
}

#[cfg(not(feature = "rpi"))]
fn open_device(_config: &Config, _touch: bool) -> Result<Hardware> {
    Err(crate::error::BridgeError::HardwareInit(
        "built without GPIO support (enable the `rpi` feature or run with --test)".into(),
    ))
}
