use super::KeyMap;

/// Turns a touch-state bitmask into symbolic commands.
#[derive(Debug, Clone)]
pub struct TouchDecoder {
    keymap: KeyMap,
}

impl TouchDecoder {
    pub fn new(keymap: KeyMap) -> Self {
        Self { keymap }
    }

    /// One name per asserted, mapped pad, in ascending pad order. Bits past
    /// the table width are ignored.
    pub fn decode(&self, bitmask: u32) -> Vec<&str> {
        (0..self.keymap.width())
            .filter(|&pad| bitmask & (1 << pad) != 0)
            .filter_map(|pad| self.keymap.get(pad))
            .collect()
    }
}
