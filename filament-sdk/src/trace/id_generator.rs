use filament::{SpanId, TraceId};
use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;

/// Interface for minting trace and span ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generates a new trace id.
    fn new_trace_id(&self) -> TraceId;

    /// Generates a new span id.
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`], producing random ids.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

/// [`IdGenerator`] producing sequential ids, for predictable tests.
#[cfg(any(test, feature = "testing"))]
#[derive(Clone, Debug)]
pub struct IncrementIdGenerator(std::sync::Arc<std::sync::atomic::AtomicU64>);

#[cfg(any(test, feature = "testing"))]
impl IncrementIdGenerator {
    /// Creates a generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for IncrementIdGenerator {
    fn default() -> Self {
        Self(std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)))
    }
}

#[cfg(any(test, feature = "testing"))]
impl IdGenerator for IncrementIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        TraceId::from(u128::from(
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        ))
    }

    fn new_span_id(&self) -> SpanId {
        SpanId::from(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }
}
