//! Splits an object into numbered byte-range parts.

use std::ops::Range;

use bytesize::MIB;
use derive_more::{AsRef, Display, Into};

use crate::error::ConfigurationError;
use crate::types::PartNumber;

/// The minimum size of every part except the last one, set to 5 MiB.
///
/// Multipart backends reject non-final parts smaller than this, so a plan
/// with more than one part must use at least this chunk size.
pub const MIN_CHUNK_SIZE: u64 = 5 * MIB;

/// The chunk size used when the caller doesn't request one, set to 7 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 7 * MIB;

/// A non-zero chunk size in bytes.
///
/// The 5 MiB lower bound is only enforced once the part count is known,
/// since a single-part upload may use any chunk size.
#[derive(Debug, Display, Into, AsRef, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSize(u64);

impl Default for ChunkSize {
    fn default() -> Self {
        Self(DEFAULT_CHUNK_SIZE)
    }
}

impl TryFrom<u64> for ChunkSize {
    type Error = ConfigurationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(ConfigurationError::ZeroChunkSize)
        } else {
            Ok(ChunkSize(value))
        }
    }
}

impl ChunkSize {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A half-open `[start, end)` range of bytes in the source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The range as buffer indices, for slicing an in-memory source.
    pub fn as_range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// One part of a planned upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    pub part_number: PartNumber,
    pub byte_range: ByteRange,
}

/// The outcome of chunk planning: how big each part is and how many there are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: ChunkSize,
    chunk_amount: u64,
}

/// Plan an upload of `total_size` bytes.
///
/// The part count is `floor(total_size / chunk_size) + 1`, so there is always
/// at least one part and the final part is short (possibly empty). When more
/// than one part is produced the chunk size must be at least [MIN_CHUNK_SIZE].
///
/// ```
/// use chunked_upload::planner::plan;
///
/// let chunk_plan = plan(20 * 1_048_576, Some(7 * 1_048_576)).unwrap();
/// assert_eq!(chunk_plan.chunk_amount(), 3);
///
/// assert!(plan(10 * 1_048_576, Some(4 * 1_048_576)).is_err());
/// ```
pub fn plan(total_size: u64, requested_chunk_size: Option<u64>) -> Result<ChunkPlan, ConfigurationError> {
    let chunk_size = match requested_chunk_size {
        Some(size) => ChunkSize::try_from(size)?,
        None => ChunkSize::default(),
    };
    let chunk_amount = total_size / chunk_size.get() + 1;

    if chunk_amount > 1 && chunk_size.get() < MIN_CHUNK_SIZE {
        return Err(ConfigurationError::ChunkTooSmall {
            chunk_size: chunk_size.get(),
            min: MIN_CHUNK_SIZE,
            chunk_amount,
        });
    }
    if chunk_amount > u64::from(u32::MAX) {
        return Err(ConfigurationError::TooManyParts {
            chunk_amount,
            max: u64::from(u32::MAX),
        });
    }

    Ok(ChunkPlan {
        total_size,
        chunk_size,
        chunk_amount,
    })
}

impl ChunkPlan {
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> ChunkSize {
        self.chunk_size
    }

    pub fn chunk_amount(&self) -> u64 {
        self.chunk_amount
    }

    /// The parts in scheduling order, numbered from 1. The last part's range
    /// is clamped to the total size.
    pub fn parts(&self) -> impl Iterator<Item = Part> + '_ {
        let chunk_size = self.chunk_size.get();
        (1..=self.chunk_amount).map(move |n| {
            let start = std::cmp::min((n - 1) * chunk_size, self.total_size);
            let end = std::cmp::min(n * chunk_size, self.total_size);
            Part {
                // plan() caps chunk_amount at u32::MAX
                part_number: PartNumber::from(n as u32),
                byte_range: ByteRange { start, end },
            }
        })
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod arbitrary {
    use proptest::prelude::*;

    use super::{ChunkSize, MIN_CHUNK_SIZE};

    /// Chunk sizes that are valid for any number of parts.
    impl Arbitrary for ChunkSize {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (MIN_CHUNK_SIZE..=5 * bytesize::GIB)
                .prop_map(ChunkSize)
                .boxed()
        }
    }
}
