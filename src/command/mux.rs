use tracing::{debug, warn};

use super::Command;
use super::decoder::TouchDecoder;
use crate::hardware::HardwareEvent;

/// The "last command sent" cell used by a single push-button.
///
/// Cycles through `states`; starts on the last entry so the first press
/// emits the first entry.
#[derive(Debug, Clone)]
pub struct ToggleState {
    states: Vec<String>,
    current: usize,
}

impl ToggleState {
    pub fn new(states: Vec<String>) -> Result<Self, String> {
        if states.is_empty() {
            return Err("toggle needs at least one state".into());
        }
        let current = states.len() - 1;
        Ok(Self { states, current })
    }

    pub fn current(&self) -> &str {
        &self.states[self.current]
    }

    fn advance(&mut self) -> &str {
        self.current = (self.current + 1) % self.states.len();
        self.current()
    }
}

impl Default for ToggleState {
    fn default() -> Self {
        Self {
            states: vec!["lamp".to_string(), "lightoff".to_string()],
            current: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MuxMode {
    /// Multi-pad sensor: every decoded name becomes one command.
    Direct(TouchDecoder),
    /// Single button: every edge advances the toggle.
    Toggle(ToggleState),
}

/// Maps hardware events to wire commands. Owned by the network loop, which
/// makes it the only writer of the toggle state.
#[derive(Debug)]
pub struct CommandMux {
    mode: MuxMode,
}

impl CommandMux {
    pub fn new(mode: MuxMode) -> Self {
        Self { mode }
    }

    pub fn direct(decoder: TouchDecoder) -> Self {
        Self::new(MuxMode::Direct(decoder))
    }

    pub fn toggle(state: ToggleState) -> Self {
        Self::new(MuxMode::Toggle(state))
    }

    /// Map a symbolic command 1:1 to its wire form.
    pub fn direct_command(name: &str) -> Command {
        Command::light(name)
    }

    /// Commands for one debounced edge, in the order they must be sent.
    pub fn commands_for(&mut self, event: &HardwareEvent) -> Vec<Command> {
        match &mut self.mode {
            MuxMode::Direct(decoder) => {
                let Some(bitmask) = event.bitmask else {
                    warn!("Edge on pin {} carried no touch state, ignoring", event.pin);
                    return Vec::new();
                };
                let names = decoder.decode(bitmask);
                debug!("Touch mask {:#06x} -> {:?}", bitmask, names);
                names.into_iter().map(Self::direct_command).collect()
            }
            MuxMode::Toggle(state) => vec![Command::light(state.advance())],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::command::KeyMap;

    fn edge(bitmask: Option<u32>) -> HardwareEvent {
        HardwareEvent {
            pin: 23,
            at: Instant::now(),
            bitmask,
        }
    }

    #[test]
    fn toggle_alternates_starting_with_lamp() {
        let mut mux = CommandMux::toggle(ToggleState::default());
        let vals: Vec<String> = (0..3)
            .flat_map(|_| mux.commands_for(&edge(None)))
            .map(|c| c.val)
            .collect();
        assert_eq!(vals, ["lamp", "lightoff", "lamp"]);
    }

    #[test]
    fn toggle_kth_command_is_lamp_when_k_odd() {
        let mut mux = CommandMux::toggle(ToggleState::default());
        for k in 1..=25 {
            let cmds = mux.commands_for(&edge(Some(0xffff)));
            assert_eq!(cmds.len(), 1);
            assert_eq!(cmds[0].cmd, "light");
            let expected = if k % 2 == 1 { "lamp" } else { "lightoff" };
            assert_eq!(cmds[0].val, expected, "edge {k}");
        }
    }

    #[test]
    fn toggle_cycles_through_n_states() {
        let states = vec!["lamp".to_string(), "glow".to_string(), "lightoff".to_string()];
        let mut state = ToggleState::new(states).unwrap();
        assert_eq!(state.current(), "lightoff");
        assert_eq!(state.advance(), "lamp");
        assert_eq!(state.advance(), "glow");
        assert_eq!(state.advance(), "lightoff");
        assert!(ToggleState::new(Vec::new()).is_err());
    }

    #[test]
    fn direct_mode_forwards_every_decoded_pad() {
        let keymap = KeyMap::from_entries([(0, "lamp"), (1, "glow")]).unwrap();
        let mut mux = CommandMux::direct(TouchDecoder::new(keymap));
        assert_eq!(
            mux.commands_for(&edge(Some(0b11))),
            vec![Command::light("lamp"), Command::light("glow")]
        );
        assert!(mux.commands_for(&edge(Some(0))).is_empty());
        assert!(mux.commands_for(&edge(None)).is_empty());
    }
}
