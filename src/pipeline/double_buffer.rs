//! Two-slot publication buffer

/// Holds the published value and a back slot, selected by a parity bit
///
/// `publish` moves a new value into the back slot, flips parity and hands the previously
/// published value back to the caller, so the back slot is always empty between
/// publishes and its allocation can be recycled by the producer.
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    slots: [Option<T>; 2],
    parity: usize,
}

impl<T> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DoubleBuffer<T> {
    pub fn new() -> Self {
        Self {
            slots: [None, None],
            parity: 0,
        }
    }

    pub fn published(&self) -> Option<&T> {
        self.slots[self.parity].as_ref()
    }

    /// Publish `value`, returning the previously published one
    pub fn publish(&mut self, value: T) -> Option<T> {
        let back = self.parity ^ 1;
        debug_assert!(self.slots[back].is_none(), "back slot was not released");
        self.slots[back] = Some(value);
        self.parity = back;
        self.slots[back ^ 1].take()
    }
}
