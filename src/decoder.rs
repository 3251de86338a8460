//! Streaming trace decoder.
//!
//! [`TraceDecoder`] inverts the wire protocol incrementally: `process`
//! accepts a chunk of bytes of any length and boundary, updating the
//! decoder's internal state and appending completed `(timestamp, fields)`
//! records to its timeline as they become known.

use crate::source::EventSource;
use crate::{REPORT_DELAY, REPORT_DELAY_MASK, REPORT_DONE, REPORT_EVENT, REPORT_EVENT_MASK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Idle,
    Delay,
    Event,
    Done,
}

impl DecoderState {
    fn label(self) -> &'static str {
        match self {
            DecoderState::Idle => "IDLE",
            DecoderState::Delay => "DELAY",
            DecoderState::Event => "EVENT",
            DecoderState::Done => "DONE",
        }
    }
}

/// The trace is corrupted: a byte arrived that does not fit the decoder's
/// current state, or named a source index past the registered table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TraceDecodingError {
    #[error(
        "at byte offset {byte_offset}: event source index {index} out of bounds ({source_count} registered)"
    )]
    SourceOutOfBounds {
        byte_offset: u64,
        index: u8,
        source_count: usize,
    },

    #[error("at byte offset {byte_offset}: invalid byte {byte:#04x} for state {state}")]
    UnexpectedByte {
        byte_offset: u64,
        byte: u8,
        state: &'static str,
    },
}

/// One field-or-bare-event value accumulated for the current timestamp.
pub type PendingEntry = (String, Option<u64>);

/// A fully decoded `(timestamp, {field -> value})` record.
pub type TimelineRecord = (u64, Vec<PendingEntry>);

/// Decodes raw analyzer traces into a timestamped sequence of field maps.
///
/// Holds only its own parsing state, timeline, and a borrow of the
/// registered source table. It never owns source metadata.
pub struct TraceDecoder<'a> {
    sources: &'a [EventSource],
    absolute_timestamps: bool,

    state: DecoderState,
    byte_offset: u64,
    timestamp: u64,
    delay: u64,
    event_src: usize,
    event_off: u32,
    event_data: u64,

    pending: Vec<PendingEntry>,
    timeline: Vec<TimelineRecord>,
}

impl<'a> TraceDecoder<'a> {
    /// `absolute_timestamps = true` (the default) accumulates
    /// `timestamp += delay` on each burst; `false` sets `timestamp :=
    /// delay` instead.
    pub fn new(sources: &'a [EventSource], absolute_timestamps: bool) -> Self {
        Self {
            sources,
            absolute_timestamps,
            state: DecoderState::Idle,
            byte_offset: 0,
            timestamp: 0,
            delay: 0,
            event_src: 0,
            event_off: 0,
            event_data: 0,
            pending: Vec::new(),
            timeline: Vec::new(),
        }
    }

    /// Names and widths of everything this decoder may emit: a bare
    /// source yields `(name, width)`; a source with fields yields
    /// `("field-source", field_width)` per field, in field order.
    pub fn events(&self) -> impl Iterator<Item = (String, u8)> + '_ {
        self.sources.iter().flat_map(|source| {
            if source.fields.is_empty() {
                vec![(source.name.clone(), source.width)]
            } else {
                source
                    .fields
                    .iter()
                    .map(|field| (format!("{}-{}", field.name, source.name), field.width))
                    .collect()
            }
        })
    }

    /// Incrementally parse a chunk of trace bytes, recording completed
    /// events. May be called repeatedly with chunks of any size.
    pub fn process(&mut self, data: &[u8]) -> Result<(), TraceDecodingError> {
        for &octet in data {
            self.process_one(octet)?;
            self.byte_offset += 1;
        }
        Ok(())
    }

    fn process_one(&mut self, octet: u8) -> Result<(), TraceDecodingError> {
        let is_delay = (octet & REPORT_DELAY_MASK) == REPORT_DELAY;
        let is_event = (octet & REPORT_EVENT_MASK) == REPORT_EVENT;
        // DONE has no variable payload bits (unlike EVENT's 6-bit index), so
        // it is the single literal zero byte, not every byte with the top
        // two bits clear. `REPORT_DONE_MASK` only documents which bits are
        // meaningful to compare; the whole byte still must equal `REPORT_DONE`.
        let is_done = octet == REPORT_DONE;

        match self.state {
            DecoderState::Idle if is_delay => {
                self.state = DecoderState::Delay;
                self.delay = (octet & !REPORT_DELAY_MASK) as u64;
            }
            DecoderState::Delay if is_delay => {
                self.delay = (self.delay << 7) | (octet & !REPORT_DELAY_MASK) as u64;
            }
            DecoderState::Idle | DecoderState::Delay if is_event => {
                self.advance_time_if_pending_delay();
                let index = octet & !REPORT_EVENT_MASK;
                if index as usize >= self.sources.len() {
                    return Err(TraceDecodingError::SourceOutOfBounds {
                        byte_offset: self.byte_offset,
                        index,
                        source_count: self.sources.len(),
                    });
                }
                self.event_src = index as usize;
                let width = self.sources[self.event_src].width;
                if width == 0 {
                    self.pending
                        .push((self.sources[self.event_src].name.clone(), None));
                    self.state = DecoderState::Idle;
                } else {
                    self.event_off = width as u32;
                    self.event_data = 0;
                    self.state = DecoderState::Event;
                }
            }
            DecoderState::Event => {
                self.event_data = (self.event_data << 8) | octet as u64;
                if self.event_off > 8 {
                    self.event_off -= 8;
                } else {
                    self.complete_event();
                    self.state = DecoderState::Idle;
                }
            }
            DecoderState::Idle if is_done => {
                self.state = DecoderState::Done;
            }
            _ => {
                return Err(TraceDecodingError::UnexpectedByte {
                    byte_offset: self.byte_offset,
                    byte: octet,
                    state: self.state.label(),
                });
            }
        }
        Ok(())
    }

    fn advance_time_if_pending_delay(&mut self) {
        if self.delay == 0 {
            return;
        }
        if !self.pending.is_empty() {
            self.timeline
                .push((self.timestamp, std::mem::take(&mut self.pending)));
        }
        if self.absolute_timestamps {
            self.timestamp += self.delay;
        } else {
            self.timestamp = self.delay;
        }
        self.delay = 0;
    }

    fn complete_event(&mut self) {
        let source = &self.sources[self.event_src];
        if source.fields.is_empty() {
            self.pending.push((source.name.clone(), Some(self.event_data)));
        } else {
            let mut offset = 0u32;
            for field in &source.fields {
                let mask = (1u64 << field.width) - 1;
                let value = (self.event_data >> offset) & mask;
                self.pending
                    .push((format!("{}-{}", field.name, source.name), Some(value)));
                offset += field.width as u32;
            }
        }
    }

    /// Return the accumulated timeline since construction or the previous
    /// flush, then empty it. If `force_pending` and there are unflushed
    /// pending fields, or the stream has ended (`DONE`), they are appended
    /// under the current timestamp first. This may produce a duplicate
    /// timestamp if more events at the same original time arrive later.
    pub fn flush(&mut self, force_pending: bool) -> Vec<TimelineRecord> {
        if (force_pending && !self.pending.is_empty()) || self.state == DecoderState::Done {
            self.timeline
                .push((self.timestamp, std::mem::take(&mut self.pending)));
        }
        std::mem::take(&mut self.timeline)
    }

    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Field;
    use crate::{REPORT_DELAY, REPORT_DONE, REPORT_EVENT};

    fn source(name: &str, width: u8) -> EventSource {
        EventSource::new(name, width, Vec::new(), crate::source::depth_for_width(width))
    }

    #[test]
    fn decodes_single_8bit_event() {
        let sources = vec![source("0", 8)];
        let mut decoder = TraceDecoder::new(&sources, true);
        decoder
            .process(&[REPORT_DELAY | 2, REPORT_EVENT | 0, 0xaa])
            .unwrap();
        assert_eq!(
            decoder.flush(true),
            vec![(2, vec![("0".to_string(), Some(0xaa))])]
        );
    }

    #[test]
    fn splits_fields_lsb_first() {
        let sources = vec![EventSource::new(
            "0",
            3,
            vec![Field::new("a", 1), Field::new("b", 2)],
            crate::source::depth_for_width(3),
        )];
        let mut decoder = TraceDecoder::new(&sources, true);
        decoder
            .process(&[
                REPORT_DELAY | 2,
                REPORT_EVENT | 0,
                0b101,
                REPORT_DELAY | 1,
                REPORT_EVENT | 0,
                0b110,
            ])
            .unwrap();
        assert_eq!(
            decoder.flush(true),
            vec![
                (2, vec![("a-0".to_string(), Some(1)), ("b-0".to_string(), Some(2))]),
                (3, vec![("a-0".to_string(), Some(0)), ("b-0".to_string(), Some(3))]),
            ]
        );
    }

    #[test]
    fn bare_event_records_none() {
        let sources = vec![source("0", 0)];
        let mut decoder = TraceDecoder::new(&sources, true);
        decoder.process(&[REPORT_DELAY | 2, REPORT_EVENT | 0]).unwrap();
        assert_eq!(
            decoder.flush(true),
            vec![(2, vec![("0".to_string(), None)])]
        );
    }

    #[test]
    fn done_byte_sets_is_done_without_duplicate_flush() {
        let sources = vec![source("0", 1)];
        let mut decoder = TraceDecoder::new(&sources, true);
        decoder
            .process(&[REPORT_DELAY | 2, REPORT_EVENT | 0, 0b1, REPORT_DONE])
            .unwrap();
        assert!(decoder.is_done());
        assert_eq!(
            decoder.flush(false),
            vec![(2, vec![("0".to_string(), Some(1))])]
        );
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let sources = vec![source("0", 8)];
        let mut decoder = TraceDecoder::new(&sources, true);
        let err = decoder.process(&[REPORT_EVENT | 5]).unwrap_err();
        assert!(matches!(err, TraceDecodingError::SourceOutOfBounds { index: 5, source_count: 1, .. }));
    }

    #[test]
    fn data_byte_in_idle_is_an_error() {
        let sources = vec![source("0", 8)];
        let mut decoder = TraceDecoder::new(&sources, true);
        let err = decoder.process(&[0x20]).unwrap_err();
        assert!(matches!(err, TraceDecodingError::UnexpectedByte { byte: 0x20, .. }));
    }

    #[test]
    fn relative_timestamps_do_not_accumulate() {
        let sources = vec![source("0", 8)];
        let mut decoder = TraceDecoder::new(&sources, false);
        decoder
            .process(&[
                REPORT_DELAY | 2,
                REPORT_EVENT | 0,
                1,
                REPORT_DELAY | 5,
                REPORT_EVENT | 0,
                2,
            ])
            .unwrap();
        let timeline = decoder.flush(true);
        assert_eq!(timeline[0].0, 2);
        assert_eq!(timeline[1].0, 5);
    }

    #[test]
    fn events_enumeration_expands_fields() {
        let sources = vec![
            source("bare", 8),
            EventSource::new(
                "fielded",
                3,
                vec![Field::new("a", 1), Field::new("b", 2)],
                crate::source::depth_for_width(3),
            ),
        ];
        let decoder = TraceDecoder::new(&sources, true);
        let events: Vec<_> = decoder.events().collect();
        assert_eq!(
            events,
            vec![
                ("bare".to_string(), 8),
                ("a-fielded".to_string(), 1),
                ("b-fielded".to_string(), 2),
            ]
        );
    }
}
