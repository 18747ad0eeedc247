//! Merged interrupt lines.
//!
//! Each chip registers one source and raises or drops its request per line
//! kind. The CPU side only ever sees the OR of all requests, plus the clock
//! at which the merged line last went active.

use crate::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterruptKind {
    /// Maskable, level-sensitive.
    Irq,
    /// Non-maskable.
    Nmi,
}

impl InterruptKind {
    const fn slot(self) -> usize {
        match self {
            Self::Irq => 0,
            Self::Nmi => 1,
        }
    }
}

/// Handle to a registered interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterruptSource(u16);

#[derive(Debug, Clone, Default)]
pub struct InterruptStatus {
    names: Vec<&'static str>,
    requests: Vec<[bool; 2]>,
    active: [usize; 2],
    asserted_at: [Option<Clock>; 2],
}

impl InterruptStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str) -> InterruptSource {
        let source = InterruptSource(self.names.len() as u16);
        self.names.push(name);
        self.requests.push([false; 2]);
        source
    }

    /// Set or clear `source`'s request on `kind`. Repeating the current
    /// state changes nothing.
    pub fn set(&mut self, source: InterruptSource, kind: InterruptKind, requesting: bool, clk: Clock) {
        let slot = kind.slot();
        let Some(request) = self.requests.get_mut(source.0 as usize) else {
            return;
        };
        if request[slot] == requesting {
            return;
        }
        request[slot] = requesting;
        if requesting {
            if self.active[slot] == 0 {
                self.asserted_at[slot] = Some(clk);
            }
            self.active[slot] += 1;
        } else {
            self.active[slot] -= 1;
            if self.active[slot] == 0 {
                self.asserted_at[slot] = None;
            }
        }
    }

    /// Merged level of `kind`: true while any source requests it.
    #[must_use]
    pub fn line(&self, kind: InterruptKind) -> bool {
        self.active[kind.slot()] > 0
    }

    #[must_use]
    pub fn requesting(&self, source: InterruptSource, kind: InterruptKind) -> bool {
        self.requests
            .get(source.0 as usize)
            .is_some_and(|r| r[kind.slot()])
    }

    /// Clock at which the merged line went active, if it is active.
    #[must_use]
    pub fn asserted_at(&self, kind: InterruptKind) -> Option<Clock> {
        self.asserted_at[kind.slot()]
    }

    #[must_use]
    pub fn source_name(&self, source: InterruptSource) -> &'static str {
        self.names.get(source.0 as usize).copied().unwrap_or("?")
    }

    pub fn rebase(&mut self, sub: Clock) {
        for at in self.asserted_at.iter_mut().flatten() {
            *at = at.saturating_sub(sub);
        }
    }

    /// Drop every request. Registrations survive.
    pub fn clear(&mut self) {
        for request in &mut self.requests {
            *request = [false; 2];
        }
        self.active = [0; 2];
        self.asserted_at = [None; 2];
    }
}
