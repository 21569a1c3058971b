use std::ops::Range;

/// Byte offset into a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceOffset(usize);

impl SourceOffset {
    pub fn byte_offset(&self) -> usize {
        self.0
    }
}

impl From<usize> for SourceOffset {
    fn from(offset: usize) -> Self {
        Self(offset)
    }
}

impl From<&SourceOffset> for miette::SourceOffset {
    fn from(offset: &SourceOffset) -> Self {
        offset.0.into()
    }
}
impl From<SourceOffset> for miette::SourceOffset {
    fn from(offset: SourceOffset) -> Self {
        Self::from(&offset)
    }
}
impl From<&SourceOffset> for miette::SourceSpan {
    fn from(offset: &SourceOffset) -> Self {
        Self::from(&SourceSpan::from(offset))
    }
}
impl From<SourceOffset> for miette::SourceSpan {
    fn from(offset: SourceOffset) -> Self {
        Self::from(&offset)
    }
}

/// Half-open byte range `[start, end)` into a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    start: SourceOffset,
    end: SourceOffset,
}

impl SourceSpan {
    pub fn range(start: SourceOffset, end: SourceOffset) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }
    /// A zero-width span, used for end-of-input positions.
    pub fn empty_at(offset: SourceOffset) -> Self {
        Self::range(offset, offset)
    }
    pub fn start(&self) -> SourceOffset {
        self.start
    }
    pub fn end(&self) -> SourceOffset {
        self.end
    }
    pub fn len(&self) -> usize {
        self.end.0 - self.start.0
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The smallest span covering both `self` and `other`.
    pub fn to(&self, other: SourceSpan) -> SourceSpan {
        Self::range(self.start.min(other.start), self.end.max(other.end))
    }
}

impl From<&SourceOffset> for SourceSpan {
    fn from(offset: &SourceOffset) -> Self {
        Self::range(*offset, (offset.0 + 1).into())
    }
}
impl From<SourceOffset> for SourceSpan {
    fn from(offset: SourceOffset) -> Self {
        Self::from(&offset)
    }
}

impl From<&SourceSpan> for miette::SourceSpan {
    fn from(span: &SourceSpan) -> Self {
        Self::new((&span.start).into(), span.len().into())
    }
}
impl From<SourceSpan> for miette::SourceSpan {
    fn from(span: SourceSpan) -> Self {
        Self::from(&span)
    }
}

impl From<Range<usize>> for SourceSpan {
    fn from(range: Range<usize>) -> Self {
        Self::range(range.start.into(), range.end.into())
    }
}

impl From<usize> for SourceSpan {
    fn from(offset: usize) -> Self {
        SourceOffset::from(offset).into()
    }
}
