//! Event source registration.
//!
//! An [`EventSource`] is a named producer with a payload width and an
//! optional ordered list of sub-fields packed into that payload, LSB first.

/// One named bit-field packed into an event source's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    pub name: String,
    pub width: u8,
}

impl Field {
    pub fn new(name: impl Into<String>, width: u8) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// A registered event source: a bit-flag plus an optional multi-bit payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventSource {
    pub name: String,
    /// Payload width in bits, `0..=32`. Zero means a bare event with no
    /// payload.
    pub width: u8,
    /// Ordered sub-fields packed into the payload starting at the LSB.
    /// Empty means the whole payload is reported under `name`.
    pub fields: Vec<Field>,
    /// Capacity of this source's data FIFO. Ignored when `width == 0`.
    pub depth: usize,
}

impl EventSource {
    pub fn new(name: impl Into<String>, width: u8, fields: Vec<Field>, depth: usize) -> Self {
        Self {
            name: name.into(),
            width,
            fields,
            depth,
        }
    }
}

/// Default per-source FIFO depth by payload width, chosen to match
/// power-of-two block-RAM aspect ratios.
pub fn depth_for_width(width: u8) -> usize {
    match width {
        0 => 0,
        1..=2 => 2048,
        3..=4 => 1024,
        5..=8 => 512,
        _ => 256,
    }
}

/// Construction-time preconditions that failed when finalizing the set of
/// registered event sources.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("too many event sources: {count} registered, at most 63 are addressable")]
    TooManySources { count: usize },

    #[error("event source {name:?} has width {width}, which exceeds the 32-bit maximum")]
    SourceWidthTooLarge { name: String, width: u8 },

    #[error(
        "event source {name:?} has fields summing to {field_bits} bits, which exceeds its width of {width} bits"
    )]
    FieldsExceedWidth {
        name: String,
        width: u8,
        field_bits: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_table_matches_width_bands() {
        assert_eq!(depth_for_width(0), 0);
        assert_eq!(depth_for_width(1), 2048);
        assert_eq!(depth_for_width(2), 2048);
        assert_eq!(depth_for_width(3), 1024);
        assert_eq!(depth_for_width(4), 1024);
        assert_eq!(depth_for_width(5), 512);
        assert_eq!(depth_for_width(8), 512);
        assert_eq!(depth_for_width(9), 256);
        assert_eq!(depth_for_width(32), 256);
    }
}
