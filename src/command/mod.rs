pub mod decoder;
pub mod mux;

use serde::{Deserialize, Serialize};

/// Highest pad count a touch bitmask can describe.
pub const MAX_PADS: u8 = 32;

/// A command as it goes over the wire: `{"cmd": ..., "val": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub cmd: String,
    pub val: String,
}

impl Command {
    pub fn new(cmd: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            val: val.into(),
        }
    }

    pub fn light(val: impl Into<String>) -> Self {
        Self::new("light", val)
    }
}

/// Static pad index → symbolic command table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMap {
    slots: Vec<Option<String>>,
}

#[derive(Deserialize)]
struct RawKeyEntry {
    pad: u8,
    command: String,
}

impl KeyMap {
    /// Build a table, rejecting a pad that appears twice instead of letting
    /// the later entry win.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (u8, S)>,
        S: Into<String>,
    {
        let mut slots: Vec<Option<String>> = Vec::new();
        for (pad, command) in entries {
            if pad >= MAX_PADS {
                return Err(format!("pad {pad} out of range (max {})", MAX_PADS - 1));
            }
            let command = command.into();
            if command.is_empty() {
                return Err(format!("pad {pad} maps to an empty command"));
            }
            let idx = pad as usize;
            if slots.len() <= idx {
                slots.resize(idx + 1, None);
            }
            if let Some(existing) = &slots[idx] {
                return Err(format!(
                    "pad {pad} mapped twice ({existing:?} and {command:?})"
                ));
            }
            slots[idx] = Some(command);
        }
        Ok(Self { slots })
    }

    /// Parse the JSON key map file: `[{"pad": 0, "command": "lamp"}, ...]`.
    pub fn from_json(content: &str) -> Result<Self, String> {
        let raw: Vec<RawKeyEntry> =
            serde_json::from_str(content).map_err(|e| format!("invalid key map: {e}"))?;
        Self::from_entries(raw.into_iter().map(|e| (e.pad, e.command)))
    }

    /// Number of pads covered, i.e. highest mapped index + 1.
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, pad: usize) -> Option<&str> {
        self.slots.get(pad).and_then(|s| s.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_to_cmd_val_object() {
        let cmd = Command::light("lamp");
        let text = serde_json::to_string(&cmd).unwrap();
        assert_eq!(text, r#"{"cmd":"light","val":"lamp"}"#);

        let back: Command = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn duplicate_pad_is_rejected() {
        let err = KeyMap::from_entries([(0, "lamp"), (1, "glow"), (0, "storm")]).unwrap_err();
        assert!(err.contains("pad 0 mapped twice"), "{err}");
    }

    #[test]
    fn pad_out_of_range_is_rejected() {
        assert!(KeyMap::from_entries([(32, "lamp")]).is_err());
        assert!(KeyMap::from_entries([(31, "lamp")]).is_ok());
    }

    #[test]
    fn sparse_table_from_json() {
        let map = KeyMap::from_json(r#"[{"pad": 3, "command": "glow"}, {"pad": 0, "command": "lamp"}]"#)
            .unwrap();
        assert_eq!(map.width(), 4);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(0), Some("lamp"));
        assert_eq!(map.get(1), None);
        assert_eq!(map.get(3), Some("glow"));
        assert_eq!(map.get(9), None);
    }

    #[test]
    fn json_duplicates_are_rejected() {
        let err = KeyMap::from_json(r#"[{"pad": 1, "command": "a"}, {"pad": 1, "command": "b"}]"#)
            .unwrap_err();
        assert!(err.contains("mapped twice"));
    }
}
