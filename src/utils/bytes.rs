//! Byte-slice utilities for bounds-oriented parsing.
//!
//! Every read of a captured field funnels through [`slice_r`], so a short buffer always
//! surfaces as [`FieldDecodeError::Truncated`] with the offset, the number of bytes needed
//! and the number of bytes actually left.

use crate::err::FieldDecodeError;

#[inline]
fn truncated(what: &'static str, offset: usize, need: usize, len: usize) -> FieldDecodeError {
    FieldDecodeError::Truncated {
        what,
        offset: offset as u64,
        need,
        have: len.saturating_sub(offset),
    }
}

/// Borrow `len` bytes at `offset`, or return `FieldDecodeError::Truncated`.
pub(crate) fn slice_r<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], FieldDecodeError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| truncated(what, offset, len, buf.len()))?;
    buf.get(offset..end)
        .ok_or_else(|| truncated(what, offset, len, buf.len()))
}

/// Borrow up to `radius` bytes on either side of `offset`, clamped to the buffer.
///
/// Returns the window together with the absolute offset of its first byte.
pub(crate) fn window(buf: &[u8], offset: usize, radius: usize) -> (&[u8], usize) {
    let start = offset.saturating_sub(radius).min(buf.len());
    let end = offset.saturating_add(radius).min(buf.len());
    (&buf[start..end], start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_r_reports_missing_bytes() {
        let buf = [1_u8, 2, 3];
        assert_eq!(slice_r(&buf, 1, 2, "pair").unwrap(), &[2, 3]);
        assert_eq!(
            slice_r(&buf, 2, 4, "quad").unwrap_err(),
            FieldDecodeError::Truncated {
                what: "quad",
                offset: 2,
                need: 4,
                have: 1
            }
        );
    }

    #[test]
    fn test_slice_r_handles_overflowing_lengths() {
        let buf = [0_u8; 4];
        assert!(slice_r(&buf, 3, usize::MAX, "huge").is_err());
    }

    #[test]
    fn test_window_is_clamped() {
        let buf: Vec<u8> = (0..10).collect();
        let (w, start) = window(&buf, 2, 4);
        assert_eq!(start, 0);
        assert_eq!(w, &[0, 1, 2, 3, 4, 5]);

        let (w, start) = window(&buf, 9, 4);
        assert_eq!(start, 5);
        assert_eq!(w, &[5, 6, 7, 8, 9]);
    }
}
