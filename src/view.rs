//! Non-owning rectangular views over a flat buffer.

use crate::backend::BufferId;

/// A `rows × cols` row-major region of a buffer starting at `offset`.
///
/// `rows` and `cols` describe the storage. When `transposed` is set the
/// kernels read the region as its `cols × rows` transpose; nothing is moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixView {
    pub buffer: BufferId,
    pub rows: usize,
    pub cols: usize,
    pub offset: usize,
    pub transposed: bool,
}

impl MatrixView {
    pub fn new(buffer: BufferId, rows: usize, cols: usize, offset: usize) -> Self {
        Self {
            buffer,
            rows,
            cols,
            offset,
            transposed: false,
        }
    }

    /// Empty view over `buffer`, to be filled by [`set`](Self::set).
    pub fn over(buffer: BufferId) -> Self {
        Self::new(buffer, 0, 0, 0)
    }

    /// Rewrites the descriptor in place. Bounds are the caller's business.
    pub fn set(&mut self, rows: usize, cols: usize, offset: usize, transposed: bool) -> &mut Self {
        self.rows = rows;
        self.cols = cols;
        self.offset = offset;
        self.transposed = transposed;
        self
    }

    /// Same storage, read transposed.
    pub fn t(mut self) -> Self {
        self.transposed = !self.transposed;
        self
    }

    /// Rows as seen by a kernel.
    #[inline]
    pub fn logical_rows(&self) -> usize {
        if self.transposed {
            self.cols
        } else {
            self.rows
        }
    }

    /// Columns as seen by a kernel.
    #[inline]
    pub fn logical_cols(&self) -> usize {
        if self.transposed {
            self.rows
        } else {
            self.cols
        }
    }

    /// Buffer index of logical element `(i, j)`.
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        if self.transposed {
            self.offset + j * self.cols + i
        } else {
            self.offset + i * self.cols + j
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the last element touched.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len()
    }

    /// Storage shape, for error messages and assertions.
    #[inline]
    pub fn shape(&self) -> [usize; 2] {
        [self.logical_rows(), self.logical_cols()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_chains() {
        let mut v = MatrixView::over(BufferId(0));
        v.set(3, 4, 10, false).set(2, 5, 7, true);
        assert_eq!(v.rows, 2);
        assert_eq!(v.cols, 5);
        assert_eq!(v.offset, 7);
        assert!(v.transposed);
    }

    #[test]
    fn test_transposed_indexing() {
        // storage 2x3 at offset 4:
        // [a b c]
        // [d e f]
        let v = MatrixView::new(BufferId(1), 2, 3, 4);
        assert_eq!(v.index(1, 2), 4 + 5);
        let t = v.t();
        assert_eq!(t.logical_rows(), 3);
        assert_eq!(t.logical_cols(), 2);
        // t(2,1) == v(1,2)
        assert_eq!(t.index(2, 1), v.index(1, 2));
        assert_eq!(t.end(), 10);
    }
}
