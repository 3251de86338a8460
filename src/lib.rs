//! Event trace codec for a logic-analyzer-style instrumentation subsystem.
//!
//! Many independent event sources each produce a bit-flag plus an optional
//! multi-bit data word on any clock cycle. [`analyzer::EventAnalyzer`] is
//! a serializer state machine (cooperative, one state transition per
//! cycle, gated by output backpressure) that compresses this stream into
//! a compact byte sequence; [`decoder::TraceDecoder`] is its host-side
//! mirror image, reconstructing a timestamped, per-source event timeline
//! from arbitrary byte chunks.
//!
//! This is designed to observe parallel, bursty processes in real time,
//! and to degrade gracefully, without losing data or breaking downstream
//! consumers, when observing processes that generate events continuously
//! or generate very many simultaneous events for a short time. It does
//! this by separating the event-mask FIFO from the per-source data FIFOs
//! and not storing timestamps explicitly: a single wide delay counter is
//! sampled into a delay FIFO only on cycles that have at least one event
//! (or when the counter saturates), rather than stamping every queued
//! entry.

pub mod analyzer;
pub mod decoder;
pub mod queue;
pub mod source;

pub use analyzer::{EventAnalyzer, EventAnalyzerBuilder, MAX_EVENT_SOURCES};
pub use decoder::{PendingEntry, TimelineRecord, TraceDecoder, TraceDecodingError};
pub use queue::BoundedQueue;
pub use source::{ConfigError, EventSource, Field, depth_for_width};

/// Delay septet tag: high bit set, low 7 bits are a big-endian septet of
/// the delay accumulator (most-significant septet first).
pub const REPORT_DELAY: u8 = 0b1000_0000;
pub const REPORT_DELAY_MASK: u8 = 0b1000_0000;

/// Event header tag: `01` in the top two bits, low 6 bits are the source
/// index, followed by `ceil(width / 8)` raw big-endian data bytes.
pub const REPORT_EVENT: u8 = 0b0100_0000;
pub const REPORT_EVENT_MASK: u8 = 0b1100_0000;

/// Stream terminator: the all-zero byte, no payload.
pub const REPORT_DONE: u8 = 0b0000_0000;
pub const REPORT_DONE_MASK: u8 = 0b1100_0000;
