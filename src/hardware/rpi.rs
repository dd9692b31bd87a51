//! Raspberry Pi backend: GPIO interrupts and an MPR121 touch controller on I2C.

use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::i2c::I2c;
use tracing::info;

use super::{EdgeCallback, EdgeDirection, InterruptLine, TouchSensor};
use crate::error::{BridgeError, Result};

pub struct GpioLine {
    gpio: Gpio,
    // Dropping an InputPin disarms its interrupt.
    pins: Vec<InputPin>,
}

impl GpioLine {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| BridgeError::HardwareInit(format!("GPIO: {e}")))?;
        Ok(Self {
            gpio,
            pins: Vec::new(),
        })
    }
}

impl InterruptLine for GpioLine {
    fn arm_interrupt(
        &mut self,
        pin: u8,
        direction: EdgeDirection,
        mut callback: EdgeCallback,
    ) -> Result<()> {
        if self.pins.iter().any(|p| p.pin() == pin) {
            return Err(BridgeError::AlreadyRegistered { pin });
        }
        let trigger = match direction {
            EdgeDirection::Rising => Trigger::RisingEdge,
            EdgeDirection::Falling => Trigger::FallingEdge,
            EdgeDirection::Both => Trigger::Both,
        };
        let mut input = self
            .gpio
            .get(pin)
            .map_err(|e| BridgeError::HardwareInit(format!("GPIO pin {pin}: {e}")))?
            .into_input_pulldown();
        input
            .set_async_interrupt(trigger, move |_level| callback())
            .map_err(|e| BridgeError::HardwareInit(format!("interrupt on pin {pin}: {e}")))?;
        self.pins.push(input);
        Ok(())
    }
}

const ELECTRODES: u8 = 12;
const TOUCH_THRESHOLD: u8 = 12;
const RELEASE_THRESHOLD: u8 = 6;

const REG_TOUCH_STATUS: u8 = 0x00;
const REG_TOUCH_THRESHOLD_0: u8 = 0x41;
const REG_DEBOUNCE: u8 = 0x5B;
const REG_CONFIG1: u8 = 0x5C;
const REG_CONFIG2: u8 = 0x5D;
const REG_ECR: u8 = 0x5E;
const REG_SOFT_RESET: u8 = 0x80;

/// Baseline filter registers (MHDR..FDLT) with the vendor-recommended values.
const FILTER_DEFAULTS: [(u8, u8); 11] = [
    (0x2B, 0x01),
    (0x2C, 0x01),
    (0x2D, 0x0E),
    (0x2E, 0x00),
    (0x2F, 0x01),
    (0x30, 0x05),
    (0x31, 0x01),
    (0x32, 0x00),
    (0x33, 0x00),
    (0x34, 0x00),
    (0x35, 0x00),
];

pub struct Mpr121 {
    i2c: I2c,
}

impl Mpr121 {
    pub fn open(address: u16) -> Result<Self> {
        let init = |e: rppal::i2c::Error| BridgeError::HardwareInit(format!("MPR121 at {address:#04x}: {e}"));

        let mut i2c = I2c::new().map_err(init)?;
        i2c.set_slave_address(address).map_err(init)?;

        let sensor = Self { i2c };
        sensor.write(REG_SOFT_RESET, 0x63).map_err(init)?;
        // Registers are only writable in stop mode.
        sensor.write(REG_ECR, 0x00).map_err(init)?;
        for electrode in 0..ELECTRODES {
            let reg = REG_TOUCH_THRESHOLD_0 + electrode * 2;
            sensor.write(reg, TOUCH_THRESHOLD).map_err(init)?;
            sensor.write(reg + 1, RELEASE_THRESHOLD).map_err(init)?;
        }
        for (reg, value) in FILTER_DEFAULTS {
            sensor.write(reg, value).map_err(init)?;
        }
        sensor.write(REG_DEBOUNCE, 0x00).map_err(init)?;
        sensor.write(REG_CONFIG1, 0x10).map_err(init)?;
        sensor.write(REG_CONFIG2, 0x20).map_err(init)?;
        sensor.write(REG_ECR, 0x80 | ELECTRODES).map_err(init)?;

        info!("MPR121 ready at {:#04x} ({} electrodes)", address, ELECTRODES);
        Ok(sensor)
    }

    fn write(&self, reg: u8, value: u8) -> rppal::i2c::Result<()> {
        self.i2c.smbus_write_byte(reg, value)
    }
}

impl TouchSensor for Mpr121 {
    fn read_bitmask(&mut self) -> Result<u32> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[REG_TOUCH_STATUS], &mut buf)
            .map_err(|e| BridgeError::HardwareRead(format!("MPR121 touch status: {e}")))?;
        Ok(u32::from(u16::from_le_bytes(buf) & 0x0FFF))
    }
}
