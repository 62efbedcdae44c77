//! Host reference backend.
//!
//! Buffers live in an arena of `Vec<f32>`. Kernels execute eagerly on
//! [`launch`](ComputeBackend::launch): operands are gathered into contiguous
//! scratch first, so any operand may alias the output, then the result is
//! written through the output view.
//!
//! Matmul rows run in parallel with rayon; inner products use 8-wide SIMD.
//! Reductions produce one partial sum per work-group exactly like the device
//! kernels, leaving the final sum to the host.

use rayon::prelude::*;
use wide::f32x8;

use super::{BufferId, ComputeBackend};
use crate::error::{FlatnetError, FlatnetResult};
use crate::kernels::{Activation, KernelLaunch, KernelOp, MatMulMode, ReduceKind};
use crate::view::MatrixView;

/// Row count below which matmul stays single-threaded.
const PARALLEL_ROWS: usize = 32;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 8-wide dot product of equally long slices.
#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = f32x8::splat(0.0);
    let mut a_chunks = a.chunks_exact(8);
    let mut b_chunks = b.chunks_exact(8);
    for (ca, cb) in (&mut a_chunks).zip(&mut b_chunks) {
        let mut a_arr = [0.0f32; 8];
        let mut b_arr = [0.0f32; 8];
        a_arr.copy_from_slice(ca);
        b_arr.copy_from_slice(cb);
        acc += f32x8::new(a_arr) * f32x8::new(b_arr);
    }
    let lanes: [f32; 8] = acc.into();
    let mut sum: f32 = lanes.iter().sum();
    for (x, y) in a_chunks.remainder().iter().zip(b_chunks.remainder()) {
        sum += x * y;
    }
    sum
}

/// Arena-backed CPU implementation of [`ComputeBackend`].
#[derive(Debug, Default)]
pub struct CpuBackend {
    buffers: Vec<Option<Vec<f32>>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total elements currently allocated.
    pub fn allocated_elements(&self) -> usize {
        self.buffers.iter().flatten().map(Vec::len).sum()
    }

    fn get(&self, id: BufferId) -> FlatnetResult<&Vec<f32>> {
        self.buffers
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(FlatnetError::UnknownBuffer(id.0))
    }

    fn get_mut(&mut self, id: BufferId) -> FlatnetResult<&mut Vec<f32>> {
        self.buffers
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(FlatnetError::UnknownBuffer(id.0))
    }

    fn check_bounds(&self, view: &MatrixView) -> FlatnetResult<()> {
        let len = self.get(view.buffer)?.len();
        if view.end() > len {
            return Err(FlatnetError::shape_mismatch(&[len], &[view.offset, view.len()]));
        }
        Ok(())
    }

    /// Copies a view out in logical row-major order.
    fn gather(&self, view: &MatrixView) -> FlatnetResult<Vec<f32>> {
        self.check_bounds(view)?;
        let data = self.get(view.buffer)?;
        let (rows, cols) = (view.logical_rows(), view.logical_cols());
        if !view.transposed {
            return Ok(data[view.offset..view.end()].to_vec());
        }
        let mut out = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                out.push(data[view.index(i, j)]);
            }
        }
        Ok(out)
    }

    /// Copies a view out as its logical transpose (columns contiguous).
    fn gather_columns(&self, view: &MatrixView) -> FlatnetResult<Vec<f32>> {
        self.gather(&view.t())
    }

    /// Applies `f(old, new_index)` to every logical element of `view`.
    fn update<F>(&mut self, view: &MatrixView, mut f: F) -> FlatnetResult<()>
    where
        F: FnMut(f32, usize) -> f32,
    {
        self.check_bounds(view)?;
        let data = self.get_mut(view.buffer)?;
        let cols = view.logical_cols();
        for i in 0..view.logical_rows() {
            for j in 0..cols {
                let idx = view.index(i, j);
                data[idx] = f(data[idx], i * cols + j);
            }
        }
        Ok(())
    }

    fn matmul(
        &mut self,
        a: &MatrixView,
        b: &MatrixView,
        c: &MatrixView,
        bias: Option<&MatrixView>,
        mode: MatMulMode,
    ) -> FlatnetResult<()> {
        let m = a.logical_rows();
        let k = a.logical_cols();
        let n = b.logical_cols();
        let a_rows = self.gather(a)?;
        let b_cols = self.gather_columns(b)?;
        let bias_row = match bias {
            Some(v) => Some(self.gather(v)?),
            None => None,
        };

        let mut product = vec![0.0f32; m * n];
        let fill = |(i, row): (usize, &mut [f32])| {
            let a_row = &a_rows[i * k..(i + 1) * k];
            for (j, out) in row.iter_mut().enumerate() {
                *out = dot(a_row, &b_cols[j * k..(j + 1) * k]);
            }
        };
        if m >= PARALLEL_ROWS && n > 0 {
            product.par_chunks_mut(n).enumerate().for_each(fill);
        } else if n > 0 {
            product.chunks_mut(n).enumerate().for_each(fill);
        }

        match mode {
            MatMulMode::Forward { activation } => self.update(c, |_, idx| {
                let mut v = product[idx];
                if let Some(bias) = &bias_row {
                    v += bias[idx % n];
                }
                match activation {
                    Activation::Identity => v,
                    Activation::Sigmoid => sigmoid(v),
                }
            }),
            MatMulMode::Accumulate { decay, scale } => {
                self.update(c, |old, idx| decay * old + scale * product[idx])
            }
        }
    }

    fn softmax(&mut self, m: &MatrixView) -> FlatnetResult<()> {
        self.check_bounds(m)?;
        let data = self.get_mut(m.buffer)?;
        let region = &mut data[m.offset..m.end()];
        if m.cols == 0 {
            return Ok(());
        }
        region.par_chunks_mut(m.cols).for_each(|row| {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for v in row.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            for v in row.iter_mut() {
                *v /= sum;
            }
        });
        Ok(())
    }

    fn row_sum(&mut self, m: &MatrixView, result: &MatrixView, decay: f32, scale: f32) -> FlatnetResult<()> {
        let columns = self.gather_columns(m)?;
        let rows = m.logical_rows();
        let sums: Vec<f32> = if rows == 0 {
            vec![0.0; m.logical_cols()]
        } else {
            columns.chunks(rows).map(|c| c.iter().sum()).collect()
        };
        self.update(result, |old, idx| decay * old + scale * sums[idx])
    }

    fn reduce(
        &mut self,
        kind: ReduceKind,
        x: &MatrixView,
        y: Option<&MatrixView>,
        scratch: &MatrixView,
        groups: usize,
    ) -> FlatnetResult<()> {
        let xs = self.gather(x)?;
        let ys = match y {
            Some(v) => self.gather(v)?,
            None => Vec::new(),
        };
        let chunk = xs.len().div_ceil(groups).max(1);
        let partials: Vec<f32> = (0..groups)
            .into_par_iter()
            .map(|g| {
                let start = (g * chunk).min(xs.len());
                let end = ((g + 1) * chunk).min(xs.len());
                (start..end)
                    .map(|i| kind.term(xs[i], ys.get(i).copied().unwrap_or(0.0)))
                    .sum()
            })
            .collect();
        let target = MatrixView::new(scratch.buffer, 1, groups, scratch.offset);
        self.update(&target, |_, idx| partials[idx])
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_buffer(&mut self, data: &[f32]) -> FlatnetResult<BufferId> {
        self.buffers.push(Some(data.to_vec()));
        Ok(BufferId(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[f32]) -> FlatnetResult<()> {
        let dst = self.get_mut(id)?;
        let end = offset + data.len();
        if end > dst.len() {
            return Err(FlatnetError::shape_mismatch(&[dst.len()], &[offset, data.len()]));
        }
        dst[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId, out: &mut [f32]) -> FlatnetResult<()> {
        let src = self.get(id)?;
        if src.len() != out.len() {
            return Err(FlatnetError::shape_mismatch(&[src.len()], &[out.len()]));
        }
        out.copy_from_slice(src);
        Ok(())
    }

    fn buffer_len(&self, id: BufferId) -> FlatnetResult<usize> {
        Ok(self.get(id)?.len())
    }

    fn release_buffer(&mut self, id: BufferId) {
        if let Some(slot) = self.buffers.get_mut(id.0) {
            *slot = None;
        }
    }

    fn launch(&mut self, launch: &KernelLaunch) -> FlatnetResult<()> {
        match launch.op {
            KernelOp::MatMul {
                a,
                b,
                c,
                bias,
                mode,
            } => self.matmul(&a, &b, &c, bias.as_ref(), mode),
            KernelOp::Softmax { m } => self.softmax(&m),
            KernelOp::Subtract { x, y, result } => {
                let xs = self.gather(&x)?;
                let ys = self.gather(&y)?;
                self.update(&result, |_, i| xs[i] - ys[i])
            }
            KernelOp::SigmoidDerivative { delta, activation } => {
                let acts = self.gather(&activation)?;
                self.update(&delta, |d, i| d * acts[i] * (1.0 - acts[i]))
            }
            KernelOp::RowSum {
                m,
                result,
                decay,
                scale,
            } => self.row_sum(&m, &result, decay, scale),
            KernelOp::ElementWiseSum {
                a,
                b,
                result,
                scale_a,
                scale_b,
            } => {
                let xs = self.gather(&a)?;
                let ys = self.gather(&b)?;
                self.update(&result, |_, i| scale_a * xs[i] + scale_b * ys[i])
            }
            KernelOp::Reduce {
                kind,
                x,
                y,
                scratch,
            } => self.reduce(kind, &x, y.as_ref(), &scratch, launch.work.groups),
            KernelOp::Scale { m, scalar } => self.update(&m, |v, _| v * scalar),
        }
    }

    fn finish(&mut self) -> FlatnetResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::WorkSize;

    fn launch(backend: &mut CpuBackend, op: KernelOp, groups: usize) {
        backend
            .launch(&KernelLaunch {
                op,
                work: WorkSize {
                    tile: 0,
                    group_size: 64,
                    groups,
                },
            })
            .unwrap();
    }

    fn read(backend: &mut CpuBackend, id: BufferId) -> Vec<f32> {
        let mut out = vec![0.0; backend.buffer_len(id).unwrap()];
        backend.read_buffer(id, &mut out).unwrap();
        out
    }

    #[test]
    fn test_dot_remainder() {
        let a: Vec<f32> = (1..=11).map(|v| v as f32).collect();
        let b = vec![1.0f32; 11];
        assert_eq!(dot(&a, &b), 66.0);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut be = CpuBackend::new();
        let id = be.create_buffer(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        launch(
            &mut be,
            KernelOp::Softmax {
                m: MatrixView::new(id, 2, 3, 0),
            },
            1,
        );
        let out = read(&mut be, id);
        assert!((out[..3].iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((out[3] - 1.0 / 3.0).abs() < 1e-6);
        assert!(out[2] > out[1] && out[1] > out[0]);
    }

    #[test]
    fn test_row_sum_with_decay() {
        let mut be = CpuBackend::new();
        // M = [1 2; 3 4], result = [10 10]
        let id = be.create_buffer(&[1.0, 2.0, 3.0, 4.0, 10.0, 10.0]).unwrap();
        launch(
            &mut be,
            KernelOp::RowSum {
                m: MatrixView::new(id, 2, 2, 0),
                result: MatrixView::new(id, 1, 2, 4),
                decay: 0.5,
                scale: -1.0,
            },
            1,
        );
        assert_eq!(&read(&mut be, id)[4..], &[1.0, -1.0]);
    }

    #[test]
    fn test_subtract_in_place() {
        let mut be = CpuBackend::new();
        let id = be.create_buffer(&[5.0, 7.0, 1.0, 2.0]).unwrap();
        launch(
            &mut be,
            KernelOp::Subtract {
                x: MatrixView::new(id, 1, 2, 0),
                y: MatrixView::new(id, 1, 2, 2),
                result: MatrixView::new(id, 1, 2, 0),
            },
            1,
        );
        assert_eq!(read(&mut be, id), vec![4.0, 5.0, 1.0, 2.0]);
    }

    #[test]
    fn test_reduce_partials() {
        let mut be = CpuBackend::new();
        let x = be.create_buffer(&[1.0; 10]).unwrap();
        let scratch = be.create_buffer(&[0.0; 4]).unwrap();
        launch(
            &mut be,
            KernelOp::Reduce {
                kind: ReduceKind::SquaredSum,
                x: MatrixView::new(x, 1, 10, 0),
                y: None,
                scratch: MatrixView::new(scratch, 1, 3, 0),
            },
            3,
        );
        let partials = read(&mut be, scratch);
        assert_eq!(partials[..3].iter().sum::<f32>(), 10.0);
        assert_eq!(partials[3], 0.0);
    }

    #[test]
    fn test_out_of_bounds_view() {
        let mut be = CpuBackend::new();
        let id = be.create_buffer(&[0.0; 4]).unwrap();
        let result = be.launch(&KernelLaunch {
            op: KernelOp::Scale {
                m: MatrixView::new(id, 2, 3, 0),
                scalar: 2.0,
            },
            work: WorkSize {
                tile: 0,
                group_size: 64,
                groups: 1,
            },
        });
        assert!(result.is_err());
    }
}
