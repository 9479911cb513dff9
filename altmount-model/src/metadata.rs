use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SegmentMapError;

/// Health classification stored inside a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStatus {
    #[default]
    Healthy,
    PartialCorrupted,
    Corrupted,
}

impl MetadataStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::PartialCorrupted => "partial_corrupted",
            Self::Corrupted => "corrupted",
        }
    }
}

impl fmt::Display for MetadataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One NNTP article covering a byte range of the virtual file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub article_id: String,
    pub segment_size: u64,
    pub start_offset: u64,
    pub end_offset: u64,
}

/// Per-file metadata describing a virtual file as an ordered sequence of
/// NNTP article segments. Serialized as JSON on disk; fields this slice of
/// the system does not interpret are preserved in `extra` and written back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_size: u64,
    #[serde(default)]
    pub status: MetadataStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_nzb_path: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FileMetadata {
    pub fn new(file_size: u64, segments: Vec<Segment>) -> Self {
        Self {
            file_size,
            status: MetadataStatus::Healthy,
            source_nzb_path: None,
            segments,
            encryption: None,
            extra: BTreeMap::new(),
        }
    }

    /// Validates the structural invariants of the segment list: segments
    /// are ordered by start offset, do not overlap, and cover
    /// `[0, file_size - 1]` contiguously. An empty list is valid only for
    /// a zero-length file.
    pub fn validate_segments(&self) -> Result<(), SegmentMapError> {
        if self.segments.is_empty() {
            if self.file_size == 0 {
                return Ok(());
            }
            return Err(SegmentMapError::MissingSegments {
                file_size: self.file_size,
            });
        }

        if self.file_size == 0 {
            return Err(SegmentMapError::SegmentsOnEmptyFile {
                count: self.segments.len(),
            });
        }

        let mut expected_start = 0u64;
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.start_offset != expected_start {
                return Err(SegmentMapError::Discontiguous {
                    index,
                    expected_start,
                    start_offset: segment.start_offset,
                });
            }
            if segment.end_offset < segment.start_offset {
                return Err(SegmentMapError::InvertedRange {
                    index,
                    start_offset: segment.start_offset,
                    end_offset: segment.end_offset,
                });
            }
            expected_start = segment.end_offset + 1;
        }

        if expected_start != self.file_size {
            return Err(SegmentMapError::CoverMismatch {
                covered: expected_start,
                file_size: self.file_size,
            });
        }

        Ok(())
    }
}
