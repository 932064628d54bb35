//! Transfer buffers.
//!
//! An operation owns its buffers for its whole life and hands them back in
//! the completion. Raw `iovec`s into them are built per syscall and never
//! outlive it.

use sockasync_core::SocketError;

use crate::sys::IOV_MAX;

/// One contiguous window `data[offset..offset + count]`.
///
/// The window always lies inside `data`; the kernel is handed exactly
/// that window, so the fields are only reachable through the validating
/// constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    data: Vec<u8>,
    offset: usize,
    count: usize,
}

impl Segment {
    /// The whole vector.
    pub fn new(data: Vec<u8>) -> Self {
        let count = data.len();
        Self {
            data,
            offset: 0,
            count,
        }
    }

    pub fn with_range(data: Vec<u8>, offset: usize, count: usize) -> Result<Self, SocketError> {
        match offset.checked_add(count) {
            Some(end) if end <= data.len() => Ok(Self { data, offset, count }),
            _ => Err(SocketError::InvalidArgument),
        }
    }

    /// The whole backing vector, window or not.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.count]
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Segment {
    fn from(data: Vec<u8>) -> Self {
        Segment::new(data)
    }
}

/// Single buffer or scatter/gather list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferBuffer {
    Single(Segment),
    List(Vec<Segment>),
}

impl TransferBuffer {
    pub fn segments(&self) -> &[Segment] {
        match self {
            TransferBuffer::Single(s) => std::slice::from_ref(s),
            TransferBuffer::List(list) => list,
        }
    }

    pub fn segments_mut(&mut self) -> &mut [Segment] {
        match self {
            TransferBuffer::Single(s) => std::slice::from_mut(s),
            TransferBuffer::List(list) => list,
        }
    }

    /// Bytes covered by all segments.
    pub fn total_len(&self) -> usize {
        self.segments().iter().map(|s| s.count).sum()
    }

    /// The single segment's vector, or every list vector concatenated
    /// over their windows. Convenience for callers that do not care about
    /// the layout.
    pub fn into_single(self) -> Segment {
        match self {
            TransferBuffer::Single(s) => s,
            TransferBuffer::List(list) => {
                let mut data = Vec::with_capacity(list.iter().map(|s| s.count).sum());
                for s in &list {
                    data.extend_from_slice(s.as_slice());
                }
                Segment::new(data)
            }
        }
    }
}

impl From<Vec<u8>> for TransferBuffer {
    fn from(data: Vec<u8>) -> Self {
        TransferBuffer::Single(Segment::new(data))
    }
}

impl From<Segment> for TransferBuffer {
    fn from(seg: Segment) -> Self {
        TransferBuffer::Single(seg)
    }
}

impl From<Vec<Segment>> for TransferBuffer {
    fn from(list: Vec<Segment>) -> Self {
        TransferBuffer::List(list)
    }
}

/// Resume point for a partially sent payload: segment index plus offset
/// into that segment's window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub index: usize,
    pub offset: usize,
}

impl Cursor {
    #[inline]
    pub fn is_done(&self, segments: &[Segment]) -> bool {
        self.index >= segments.len()
    }

    /// Move forward by `n` bytes, skipping exhausted and empty segments.
    pub fn advance(&mut self, segments: &[Segment], mut n: usize) {
        while self.index < segments.len() {
            let remaining = segments[self.index].count - self.offset;
            if n < remaining {
                self.offset += n;
                return;
            }
            n -= remaining;
            self.index += 1;
            self.offset = 0;
        }
        debug_assert_eq!(n, 0, "advanced past the end of the payload");
    }

    /// Skip leading empty segments.
    pub fn normalize(&mut self, segments: &[Segment]) {
        self.advance(segments, 0);
    }
}

/// `iovec`s for the unsent remainder, starting at `cursor`.
pub(crate) fn send_iovecs(segments: &[Segment], cursor: Cursor) -> Vec<libc::iovec> {
    let mut iov = Vec::with_capacity((segments.len() - cursor.index.min(segments.len())).min(IOV_MAX));
    for (i, seg) in segments.iter().enumerate().skip(cursor.index) {
        if iov.len() == IOV_MAX {
            break;
        }
        let skip = if i == cursor.index { cursor.offset } else { 0 };
        let len = seg.count - skip;
        if len == 0 {
            continue;
        }
        let start = seg.offset + skip;
        iov.push(libc::iovec {
            iov_base: seg.data[start..].as_ptr() as *mut libc::c_void,
            iov_len: len,
        });
    }
    iov
}

/// `iovec`s covering at most `limit` bytes of the receive windows.
pub(crate) fn receive_iovecs(segments: &mut [Segment], mut limit: usize) -> Vec<libc::iovec> {
    let mut iov = Vec::with_capacity(segments.len().min(IOV_MAX));
    for seg in segments.iter_mut() {
        if limit == 0 || iov.len() == IOV_MAX {
            break;
        }
        let len = seg.count.min(limit);
        if len == 0 {
            continue;
        }
        let start = seg.offset;
        iov.push(libc::iovec {
            iov_base: seg.data[start..].as_mut_ptr() as *mut libc::c_void,
            iov_len: len,
        });
        limit -= len;
    }
    iov
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(sizes: &[usize]) -> Vec<Segment> {
        sizes.iter().map(|&n| Segment::new(vec![0u8; n])).collect()
    }

    #[test]
    fn test_with_range_bounds() {
        assert!(Segment::with_range(vec![0; 10], 2, 8).is_ok());
        assert_eq!(
            Segment::with_range(vec![0; 10], 3, 8),
            Err(SocketError::InvalidArgument)
        );
        assert_eq!(
            Segment::with_range(vec![0; 10], usize::MAX, 2),
            Err(SocketError::InvalidArgument)
        );
        assert_eq!(
            Segment::with_range(vec![0; 4], 0, 64),
            Err(SocketError::InvalidArgument)
        );
        assert_eq!(
            Segment::with_range(vec![0; 4], 5, 0),
            Err(SocketError::InvalidArgument)
        );
    }

    #[test]
    fn test_receive_iovecs_stay_inside_allocation() {
        let mut s = vec![
            Segment::with_range(vec![0u8; 8], 6, 2).unwrap(),
            Segment::new(vec![0u8; 4]),
        ];
        let iov = receive_iovecs(&mut s, 1 << 20);
        assert_eq!(iov.len(), 2);
        for (v, seg) in iov.iter().zip(&s) {
            let base = seg.data().as_ptr() as usize;
            let start = v.iov_base as usize;
            assert!(start >= base);
            assert!(start + v.iov_len <= base + seg.data().len());
        }
    }

    #[test]
    fn test_cursor_advances_across_segments() {
        let s = segs(&[4, 0, 6]);
        let mut c = Cursor::default();

        c.advance(&s, 3);
        assert_eq!(c, Cursor { index: 0, offset: 3 });

        // Finishing segment 0 also skips the empty segment 1.
        c.advance(&s, 1);
        assert_eq!(c, Cursor { index: 2, offset: 0 });

        c.advance(&s, 5);
        assert_eq!(c, Cursor { index: 2, offset: 5 });
        assert!(!c.is_done(&s));

        c.advance(&s, 1);
        assert!(c.is_done(&s));
    }

    #[test]
    fn test_send_iovecs_start_at_cursor() {
        let mut s = segs(&[4, 6]);
        s[1] = Segment::with_range(vec![9u8; 10], 2, 6).unwrap();
        let iov = send_iovecs(&s, Cursor { index: 0, offset: 3 });
        assert_eq!(iov.len(), 2);
        assert_eq!(iov[0].iov_len, 1);
        assert_eq!(iov[1].iov_len, 6);
        assert_eq!(iov[1].iov_base as *const u8, s[1].data()[2..].as_ptr());
    }

    #[test]
    fn test_receive_iovecs_bounded_by_limit() {
        let mut s = segs(&[4, 4, 4]);
        let iov = receive_iovecs(&mut s, 6);
        assert_eq!(iov.len(), 2);
        assert_eq!(iov[0].iov_len, 4);
        assert_eq!(iov[1].iov_len, 2);
    }

    #[test]
    fn test_into_single_concatenates_windows() {
        let list = TransferBuffer::List(vec![
            Segment::with_range(b"xxab".to_vec(), 2, 2).unwrap(),
            Segment::new(b"cd".to_vec()),
        ]);
        assert_eq!(list.total_len(), 4);
        assert_eq!(list.into_single().as_slice(), b"abcd");
    }
}
