//! Inode range allocation for attached catalogs.

/// Inodes at or below this value are reserved and never handed to catalog entries.
pub const INODE_OFFSET: u64 = 255;

/// The inode of the repository root before annotation.
pub const ROOT_INODE: u64 = INODE_OFFSET + 1;

/// Gauge plus generation at or above this value no longer fits 32-bit consumers.
pub const INODE_WATERMARK: u64 = 1 << 32;

/// Half-open range `[offset, offset + size)` of raw inodes owned by one catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InodeRange {
    pub offset: u64,
    pub size: u64,
}

impl InodeRange {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    #[must_use]
    pub fn contains(&self, inode: u64) -> bool {
        (self.offset..self.end()).contains(&inode)
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Raw inode of row `row_id`. Rows are numbered from 1.
    #[must_use]
    pub fn inode_for_row(&self, row_id: u64) -> u64 {
        self.offset + row_id.saturating_sub(1)
    }

    /// Inverse of [`inode_for_row`](Self::inode_for_row), if `inode` belongs to this range.
    #[must_use]
    pub fn row_for_inode(&self, inode: u64) -> Option<u64> {
        self.contains(inode).then(|| inode - self.offset + 1)
    }
}

/// Monotonically increasing allocator of inode ranges.
///
/// Numbers are never reused within one generation. Released ranges are only counted;
/// reclamation happens when the whole tree is replaced and the gauge is [`reset`](Self::reset).
#[derive(Debug)]
pub struct InodeAllocator {
    gauge: u64,
    released: u64,
    watermark_exceeded: bool,
}

impl Default for InodeAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gauge: ROOT_INODE,
            released: 0,
            watermark_exceeded: false,
        }
    }

    pub fn acquire(&mut self, size: u64) -> InodeRange {
        let range = InodeRange {
            offset: self.gauge,
            size,
        };
        self.gauge += size;
        range
    }

    pub fn release(&mut self, range: InodeRange) {
        self.released += range.size;
    }

    /// Next inode that would be handed out.
    #[must_use]
    pub fn gauge(&self) -> u64 {
        self.gauge
    }

    /// Number of inodes released since the last reset.
    #[must_use]
    pub fn released(&self) -> u64 {
        self.released
    }

    pub fn reset(&mut self) {
        self.gauge = ROOT_INODE;
        self.released = 0;
    }

    /// Flip the sticky watermark flag once `gauge + generation` leaves the 32-bit range.
    /// Returns whether the flag flipped on this call.
    pub fn check_watermark(&mut self, generation: u64) -> bool {
        if self.watermark_exceeded {
            return false;
        }
        if self.gauge.saturating_add(generation) >= INODE_WATERMARK {
            self.watermark_exceeded = true;
            return true;
        }
        false
    }

    #[must_use]
    pub fn watermark_exceeded(&self) -> bool {
        self.watermark_exceeded
    }
}
