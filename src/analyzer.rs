//! Event ingress and the serializer state machine.
//!
//! [`EventAnalyzer`] owns the three FIFOs (event-mask, delay, per-source
//! data) and the serializer's state. [`EventAnalyzer::record_cycle`] is the
//! ingress half: one call per clock cycle, pushing triggered sources' data
//! and masks. [`EventAnalyzer::step`] is the serializer half: at most one
//! state transition, emitting at most one byte, gated by the output
//! queue's `writable()`.

use crate::queue::BoundedQueue;
use crate::source::{ConfigError, EventSource, Field, depth_for_width};
use crate::{REPORT_DELAY, REPORT_DONE, REPORT_EVENT};

/// Upper bound on registered event sources: the wire format's event index
/// is 6 bits, so at most 63 sources are addressable (`N < 64`).
pub const MAX_EVENT_SOURCES: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SerializerState {
    WaitEvent,
    ReportDelay,
    /// Emitting delay septet number `k`, most-significant first.
    ReportDelaySeptet(u8),
    ReportEvent,
    /// Emitting event data octet number `k`, most-significant first.
    ReportEventData(u8),
    ReportDone,
    Done,
}

/// Builder for [`EventAnalyzer`]. Event sources are registered here and
/// become immutable once [`EventAnalyzerBuilder::build`] succeeds.
pub struct EventAnalyzerBuilder {
    delay_width: u32,
    event_depth_override: Option<usize>,
    sources: Vec<EventSource>,
}

impl EventAnalyzerBuilder {
    pub fn new(delay_width: u32) -> Self {
        Self {
            delay_width,
            event_depth_override: None,
            sources: Vec::new(),
        }
    }

    /// Override the shared event-mask/delay FIFO depth instead of deriving
    /// it from the source count and delay width.
    pub fn event_depth(mut self, depth: usize) -> Self {
        self.event_depth_override = Some(depth);
        self
    }

    /// Register an event source. `depth` defaults per the width table in
    /// [`depth_for_width`] when `None`.
    pub fn add_event_source(
        mut self,
        name: impl Into<String>,
        width: u8,
        fields: &[(&str, u8)],
        depth: Option<usize>,
    ) -> Self {
        let fields = fields
            .iter()
            .map(|(n, w)| Field::new(*n, *w))
            .collect::<Vec<_>>();
        let depth = depth.unwrap_or_else(|| depth_for_width(width));
        self.sources.push(EventSource::new(name, width, fields, depth));
        self
    }

    pub fn build(self) -> Result<EventAnalyzer, ConfigError> {
        if self.sources.len() > MAX_EVENT_SOURCES {
            return Err(ConfigError::TooManySources {
                count: self.sources.len(),
            });
        }
        for source in &self.sources {
            if source.width > 32 {
                return Err(ConfigError::SourceWidthTooLarge {
                    name: source.name.clone(),
                    width: source.width,
                });
            }
            let field_bits: u32 = source.fields.iter().map(|f| f.width as u32).sum();
            if field_bits > source.width as u32 {
                return Err(ConfigError::FieldsExceedWidth {
                    name: source.name.clone(),
                    width: source.width,
                    field_bits,
                });
            }
        }

        let n_width = u8::try_from(self.sources.len()).unwrap_or(u8::MAX);
        let delay_lookup_width = u8::try_from(self.delay_width).unwrap_or(u8::MAX);
        let event_depth = self.event_depth_override.unwrap_or_else(|| {
            depth_for_width(n_width).min(depth_for_width(delay_lookup_width))
        });

        let data_fifos = self
            .sources
            .iter()
            .map(|s| {
                if s.width == 0 {
                    None
                } else {
                    Some(BoundedQueue::new(s.depth))
                }
            })
            .collect();

        Ok(EventAnalyzer {
            sources: self.sources,
            delay_width: self.delay_width,
            event_fifo: BoundedQueue::new(event_depth),
            delay_fifo: BoundedQueue::new(event_depth),
            data_fifos,
            delay_timer: 1,
            done: false,
            state: SerializerState::WaitEvent,
            delay_accumulator: 0,
            event_pending: 0,
            pending_event_data: 0,
        })
    }
}

impl Default for EventAnalyzerBuilder {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Owns the analyzer's FIFOs and the serializer's state machine.
pub struct EventAnalyzer {
    sources: Vec<EventSource>,
    delay_width: u32,
    event_fifo: BoundedQueue<u64>,
    delay_fifo: BoundedQueue<u64>,
    data_fifos: Vec<Option<BoundedQueue<u32>>>,
    delay_timer: u64,
    done: bool,
    state: SerializerState,
    delay_accumulator: u64,
    event_pending: u64,
    /// Data word latched by `REPORT-EVENT`, consumed octet-by-octet by the
    /// `REPORT-EVENT-DATA-k` states.
    pending_event_data: u32,
}

impl EventAnalyzer {
    pub fn sources(&self) -> &[EventSource] {
        &self.sources
    }

    /// Assert or de-assert the `done` flag. Asserting it while idle drains
    /// what is queued and emits a single `REPORT_DONE`; de-asserting it
    /// while parked in `DONE` re-arms the machine for a fresh trace.
    pub fn set_done(&mut self, done: bool) {
        self.done = done;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, SerializerState::Done)
    }

    /// Force the delay timer to an arbitrary value, bypassing the normal
    /// per-cycle increment. Lets a caller drive the timer straight to
    /// saturation to test that path without stepping through tens of
    /// thousands of idle cycles.
    pub fn force_delay_timer(&mut self, value: u64) {
        self.delay_timer = value;
    }

    /// Ingress: one clock cycle. `triggers[i]`/`data[i]` are this cycle's
    /// trigger bit and data word for source `i`. Returns `true` if any
    /// FIFO was full and dropped a write this cycle. Recovering from that
    /// is the ingress caller's responsibility; the surrounding system is
    /// expected to pause producers before this happens.
    pub fn record_cycle(&mut self, triggers: &[bool], data: &[u32]) -> bool {
        debug_assert_eq!(triggers.len(), self.sources.len());
        debug_assert_eq!(data.len(), self.sources.len());

        let mut overflowed = false;
        let mut mask: u64 = 0;
        for (i, source) in self.sources.iter().enumerate() {
            if !triggers[i] {
                continue;
            }
            mask |= 1 << i;
            if source.width > 0 {
                let masked = if source.width == 32 {
                    data[i]
                } else {
                    data[i] & ((1u32 << source.width) - 1)
                };
                if let Some(fifo) = self.data_fifos[i].as_mut() {
                    overflowed |= !fifo.enqueue(masked);
                }
            }
        }

        let any_trigger = mask != 0;
        if any_trigger {
            overflowed |= !self.event_fifo.enqueue(mask);
        }

        let delay_max = (1u64 << self.delay_width.min(63)) - 1;
        if any_trigger || self.delay_timer >= delay_max {
            overflowed |= !self.delay_fifo.enqueue(self.delay_timer);
            self.delay_timer = 1;
        } else {
            self.delay_timer += 1;
        }

        overflowed
    }

    /// Serializer: at most one state transition, emitting at most one byte
    /// into `output` when it is `writable()`. Returns the byte emitted, if
    /// any.
    pub fn step(&mut self, output: &mut BoundedQueue<u8>) -> Option<u8> {
        match self.state {
            SerializerState::WaitEvent => {
                if self.delay_fifo.readable() {
                    if let Some(delay) = self.delay_fifo.dequeue() {
                        self.delay_accumulator += delay;
                    }
                }
                if self.event_fifo.readable() {
                    if let Some(mask) = self.event_fifo.dequeue() {
                        self.event_pending = mask;
                        if mask != 0 {
                            self.state = SerializerState::ReportDelay;
                        }
                    }
                } else if self.done {
                    self.state = SerializerState::ReportDone;
                }
                None
            }

            SerializerState::ReportDelay => {
                // Five septets (35 bits) is the cap: enough to sum any
                // realistic number of saturated delay-FIFO entries without
                // truncation.
                debug_assert!(self.delay_accumulator < (1u64 << 35));
                let septets = if self.delay_accumulator >= 128u64.pow(4) {
                    5
                } else if self.delay_accumulator >= 128u64.pow(3) {
                    4
                } else if self.delay_accumulator >= 128u64.pow(2) {
                    3
                } else if self.delay_accumulator >= 128 {
                    2
                } else {
                    1
                };
                self.state = SerializerState::ReportDelaySeptet(septets);
                None
            }

            SerializerState::ReportDelaySeptet(k) => {
                if !output.writable() {
                    return None;
                }
                let septet = ((self.delay_accumulator >> ((k - 1) * 7)) & 0x7f) as u8;
                let byte = REPORT_DELAY | septet;
                output.enqueue(byte);
                self.state = if k == 1 {
                    self.delay_accumulator = 0;
                    SerializerState::ReportEvent
                } else {
                    SerializerState::ReportDelaySeptet(k - 1)
                };
                Some(byte)
            }

            SerializerState::ReportEvent => {
                if !output.writable() {
                    return None;
                }
                let i = self.event_pending.trailing_zeros() as usize;
                let byte = REPORT_EVENT | (i as u8);
                output.enqueue(byte);
                self.event_pending &= !(1u64 << i);

                let width = self.sources[i].width;
                let event_data = if width > 0 {
                    self.data_fifos[i]
                        .as_mut()
                        .and_then(|fifo| fifo.dequeue())
                        .unwrap_or(0)
                } else {
                    0
                };

                self.state = if width > 24 {
                    SerializerState::ReportEventData(4)
                } else if width > 16 {
                    SerializerState::ReportEventData(3)
                } else if width > 8 {
                    SerializerState::ReportEventData(2)
                } else if width > 0 {
                    SerializerState::ReportEventData(1)
                } else if self.event_pending != 0 {
                    SerializerState::ReportEvent
                } else {
                    SerializerState::WaitEvent
                };

                self.pending_event_data = event_data;
                Some(byte)
            }

            SerializerState::ReportEventData(k) => {
                if !output.writable() {
                    return None;
                }
                let byte = ((self.pending_event_data >> ((k - 1) * 8)) & 0xff) as u8;
                output.enqueue(byte);
                self.state = if k == 1 {
                    if self.event_pending != 0 {
                        SerializerState::ReportEvent
                    } else {
                        SerializerState::WaitEvent
                    }
                } else {
                    SerializerState::ReportEventData(k - 1)
                };
                Some(byte)
            }

            SerializerState::ReportDone => {
                if !output.writable() {
                    return None;
                }
                output.enqueue(REPORT_DONE);
                self.state = SerializerState::Done;
                Some(REPORT_DONE)
            }

            SerializerState::Done => {
                if !self.done {
                    self.state = SerializerState::WaitEvent;
                }
                None
            }
        }
    }

    /// Step repeatedly until the machine can make no further progress this
    /// instant: either the output queue is full (backpressure stall) or
    /// `WAIT-EVENT`/`DONE` has nothing left to do. Useful for software
    /// simulation loops that want to drain between cycles rather than
    /// hand-stepping.
    pub fn drain_into(&mut self, output: &mut BoundedQueue<u8>) -> usize {
        let mut emitted = 0;
        loop {
            let before = self.state;
            if self.step(output).is_some() {
                emitted += 1;
                continue;
            }
            if self.state == before {
                break;
            }
        }
        emitted
    }
}
