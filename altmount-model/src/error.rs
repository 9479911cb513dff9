use std::fmt::{self, Display};

/// A violation of the segment-map invariants: segments must be ordered by
/// start offset, non-overlapping, and cover `[0, file_size - 1]` without
/// gaps. Each variant carries the offending segment index and offsets so
/// callers can report exactly which part of a record is inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMapError {
    /// A non-empty file with no segments at all.
    MissingSegments { file_size: u64 },
    /// Segments recorded against a zero-length file.
    SegmentsOnEmptyFile { count: usize },
    /// A segment starts somewhere other than one byte past its
    /// predecessor's end (a gap when late, an overlap when early).
    Discontiguous {
        index: usize,
        expected_start: u64,
        start_offset: u64,
    },
    /// A segment whose end offset precedes its start offset.
    InvertedRange {
        index: usize,
        start_offset: u64,
        end_offset: u64,
    },
    /// The segments together cover a different byte count than the file
    /// claims.
    CoverMismatch { covered: u64, file_size: u64 },
}

impl Display for SegmentMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentMapError::MissingSegments { file_size } => {
                write!(f, "no segments for a file of {file_size} bytes")
            }
            SegmentMapError::SegmentsOnEmptyFile { count } => {
                write!(f, "{count} segments recorded for a zero-length file")
            }
            SegmentMapError::Discontiguous {
                index,
                expected_start,
                start_offset,
            } => write!(
                f,
                "segment {index} starts at {start_offset} but {expected_start} was expected"
            ),
            SegmentMapError::InvertedRange {
                index,
                start_offset,
                end_offset,
            } => write!(
                f,
                "segment {index} ends at {end_offset} before its start {start_offset}"
            ),
            SegmentMapError::CoverMismatch {
                covered,
                file_size,
            } => write!(
                f,
                "segments cover [0, {covered}) but the file is {file_size} bytes"
            ),
        }
    }
}

impl std::error::Error for SegmentMapError {}
