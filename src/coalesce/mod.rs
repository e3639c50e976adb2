//! Change coalescing: one deduplicated key set and one downstream signal
//! per flush cycle, no matter how many raw mutation batches arrive.

mod coalescer;

pub use coalescer::{ChangeCoalescer, CoalescerSignal};
