use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Open,
    Closing,
    Closed,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Open,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

/// `Open -> Closing -> Closed`, each transition taken exactly once.
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Open as u8))
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    /// Returns `true` for the single caller that moved the client out of `Open`.
    pub(crate) fn begin_close(&self) -> bool {
        self.0
            .compare_exchange(
                LifecycleState::Open as u8,
                LifecycleState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_close(&self) {
        self.0.store(LifecycleState::Closed as u8, Ordering::Release);
    }
}
