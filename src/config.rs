use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::command::KeyMap;
use crate::hardware::EdgeDirection;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub hardware: HardwareConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// Single push-button cycling through `toggle_states`.
    Toggle,
    /// Multi-pad capacitive sensor decoded through the key map.
    Touch,
}

impl FromStr for BridgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toggle" | "button" => Ok(Self::Toggle),
            "touch" => Ok(Self::Touch),
            other => Err(format!("unknown BRIDGE_MODE '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HardwareConfig {
    pub mode: BridgeMode,
    /// BCM numbering.
    pub pin: u8,
    pub edge: EdgeDirection,
    pub debounce: Duration,
    #[cfg_attr(not(feature = "rpi"), allow(dead_code))]
    pub i2c_address: u16,
    pub keymap: KeyMap,
    pub toggle_states: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// `None` retries forever, `Some(0)` never retries.
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parsed<T>(key: &str, default: T) -> Result<T, String>
where
    T: FromStr<Err = String>,
{
    match env_optional(key) {
        Some(v) => v.parse().map_err(|e| format!("{key}: {e}")),
        None => Ok(default),
    }
}

impl Config {
    /// Load from the environment. `server_override` (the `--socket` flag)
    /// wins over `BRIDGE_SERVER`.
    pub fn from_env(server_override: Option<&str>) -> Result<Self, String> {
        let server = server_override
            .map(str::to_string)
            .or_else(|| env_optional("BRIDGE_SERVER"))
            .ok_or("BRIDGE_SERVER environment variable or --socket is required")?;

        let mode = env_parsed("BRIDGE_MODE", BridgeMode::Toggle)?;
        let keymap = match mode {
            BridgeMode::Touch => {
                let path = env_or_default("KEY_MAP_FILE", "keymap.json".to_string());
                load_keymap(&path)?
            }
            BridgeMode::Toggle => KeyMap::default(),
        };
        let toggle_states = parse_list(&env_or_default(
            "TOGGLE_STATES",
            "lamp,lightoff".to_string(),
        ));
        let i2c_address = match env_optional("TOUCH_I2C_ADDRESS") {
            Some(v) => parse_address(&v)?,
            None => 0x5A,
        };
        let max_attempts = match env_optional("RECONNECT_MAX_ATTEMPTS") {
            Some(v) => Some(
                v.parse()
                    .map_err(|e| format!("RECONNECT_MAX_ATTEMPTS: {e}"))?,
            ),
            None => None,
        };

        let config = Self {
            server: ServerConfig {
                url: normalize_url(&server),
                connect_timeout: Duration::from_secs(env_or_default("CONNECT_TIMEOUT_SECS", 60)),
                request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 60)),
            },
            hardware: HardwareConfig {
                mode,
                pin: env_or_default("GPIO_PIN", 23),
                edge: env_parsed("GPIO_EDGE", EdgeDirection::Rising)?,
                debounce: Duration::from_millis(env_or_default("DEBOUNCE_MS", 500)),
                i2c_address,
                keymap,
                toggle_states,
            },
            reconnect: ReconnectConfig {
                max_attempts,
                initial_backoff: Duration::from_secs(env_or_default("RECONNECT_INITIAL_SECS", 5)),
                max_backoff: Duration::from_secs(env_or_default("RECONNECT_MAX_SECS", 60)),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.server.url == "ws://" {
            return Err("server address must not be empty".into());
        }
        if self.server.connect_timeout.is_zero() || self.server.request_timeout.is_zero() {
            return Err("CONNECT_TIMEOUT_SECS and REQUEST_TIMEOUT_SECS must be > 0".into());
        }
        if self.hardware.mode == BridgeMode::Touch && self.hardware.keymap.is_empty() {
            return Err("touch mode needs at least one key map entry".into());
        }
        if self.hardware.toggle_states.is_empty() {
            return Err("TOGGLE_STATES must list at least one state".into());
        }
        if self.reconnect.initial_backoff > self.reconnect.max_backoff {
            return Err("RECONNECT_INITIAL_SECS must not exceed RECONNECT_MAX_SECS".into());
        }
        Ok(())
    }
}

fn load_keymap(path: &str) -> Result<KeyMap, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {path}: {e}"))?;
    KeyMap::from_json(&content).map_err(|e| format!("{path}: {e}"))
}

/// "192.168.1.239/socket/" → "ws://192.168.1.239/socket/"
fn normalize_url(addr: &str) -> String {
    let addr = addr.trim();
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("ws://{addr}")
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_address(raw: &str) -> Result<u16, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("TOUCH_I2C_ADDRESS '{raw}': {e}"))
}
