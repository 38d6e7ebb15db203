//! Time seams for the cooperative scheduler.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

/// Monotonic tick source, relative to an unknown epoch.
pub trait Timer {
    /// Milliseconds since the epoch
    fn ticks_ms(&self) -> u64;
}

/// Wall-clock time of day, as kept by the RTC
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeOfDay {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl TimeOfDay {
    pub fn from_seconds(secs: u32) -> Self {
        let secs = secs % 86_400;
        Self {
            hours: (secs / 3600) as u8,
            minutes: ((secs / 60) % 60) as u8,
            seconds: (secs % 60) as u8,
        }
    }
}

/// Wall-clock source used by the beacon payload and the mesh display
pub trait WallClock {
    fn time_of_day(&self) -> TimeOfDay;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::{TimeOfDay, Timer, WallClock};
    use alloc::rc::Rc;
    use core::cell::Cell;

    /// Manually-advanced clock for driving component steps in tests.
    /// Clones share the same underlying time.
    #[derive(Clone)]
    pub struct MockTimer(Rc<Cell<u64>>);

    impl MockTimer {
        pub fn new() -> Self {
            MockTimer(Rc::new(Cell::new(0)))
        }

        pub fn set_ms(&self, ms: u64) {
            self.0.set(ms);
        }

        pub fn advance_ms(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    impl Timer for MockTimer {
        fn ticks_ms(&self) -> u64 {
            self.0.get()
        }
    }

    impl WallClock for MockTimer {
        fn time_of_day(&self) -> TimeOfDay {
            TimeOfDay::from_seconds((self.0.get() / 1000) as u32)
        }
    }
}
