//! Compute kernel dispatcher.
//!
//! Every numeric primitive of the trainer is a [`KernelOp`] over
//! [`MatrixView`]s. The [`Dispatcher`] validates shapes, picks tile and
//! work-group sizes from the view dimensions, and hands the resulting
//! [`KernelLaunch`] to the backend.
//!
//! | Primitive | Effect |
//! |-----------|--------|
//! | [`matmul`](Dispatcher::matmul) `Forward` | `C := act(A·B + bias)` |
//! | [`matmul`](Dispatcher::matmul) `Accumulate` | `C := decay·C + scale·A·B` |
//! | [`softmax`](Dispatcher::softmax) | row-wise softmax in place |
//! | [`subtract`](Dispatcher::subtract) | `R := X - Y` |
//! | [`sigmoid_derivative`](Dispatcher::sigmoid_derivative) | `D := D ⊙ A ⊙ (1 - A)` |
//! | [`row_sum`](Dispatcher::row_sum) | `r := decay·r + scale·Σ_rows M` |
//! | [`elementwise_sum`](Dispatcher::elementwise_sum) | `R := sa·A + sb·B` |
//! | [`cross_entropy`](Dispatcher::cross_entropy) | two-stage reduction, returns scalar |
//! | [`l2_norm`](Dispatcher::l2_norm) | two-stage sum of squares, returns scalar |
//! | [`scale`](Dispatcher::scale) | `M := s·M` |
//!
//! Shape violations are programming errors and panic.

use crate::backend::ComputeBackend;
use crate::buffer::Buffer;
use crate::config::OutputActivation;
use crate::error::FlatnetResult;
use crate::view::MatrixView;

/// Threads per work-group for element-wise kernels.
pub const WORKGROUP_SIZE: usize = 64;

/// Threads per work-group for the partial-sum reductions.
pub const REDUCE_GROUP_SIZE: usize = 256;

/// Capacity of the reduction scratch buffer (maximum partial sums).
pub const MAX_PARTIALS: usize = 1024;

/// Smallest argument passed to `ln` in the cross-entropy terms.
pub const LOG_FLOOR: f32 = 1e-30;

/// Element-wise activation fused into the forward matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Sigmoid,
}

/// What the fused matmul does with its product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatMulMode {
    /// `C := activation(A·B + bias)`.
    Forward { activation: Activation },
    /// `C := decay·C + scale·(A·B)`; bias is ignored.
    Accumulate { decay: f32, scale: f32 },
}

/// Per-element term of a two-stage reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    /// `-t·ln(y)`, skipped where `t == 0`.
    CategoricalCrossEntropy,
    /// `-(t·ln(y) + (1-t)·ln(1-y))`, zero-weight terms skipped.
    BinaryCrossEntropy,
    /// `x²`.
    SquaredSum,
}

impl ReduceKind {
    /// The term contributed by one element. `y` is ignored for `SquaredSum`.
    #[inline]
    pub fn term(self, x: f32, y: f32) -> f32 {
        match self {
            ReduceKind::CategoricalCrossEntropy => {
                if x == 0.0 {
                    0.0
                } else {
                    -x * y.max(LOG_FLOOR).ln()
                }
            }
            ReduceKind::BinaryCrossEntropy => {
                let mut acc = 0.0;
                if x != 0.0 {
                    acc -= x * y.max(LOG_FLOOR).ln();
                }
                if x != 1.0 {
                    acc -= (1.0 - x) * (1.0 - y).max(LOG_FLOOR).ln();
                }
                acc
            }
            ReduceKind::SquaredSum => x * x,
        }
    }
}

/// One numeric primitive with its operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelOp {
    MatMul {
        a: MatrixView,
        b: MatrixView,
        c: MatrixView,
        bias: Option<MatrixView>,
        mode: MatMulMode,
    },
    Softmax {
        m: MatrixView,
    },
    Subtract {
        x: MatrixView,
        y: MatrixView,
        result: MatrixView,
    },
    SigmoidDerivative {
        delta: MatrixView,
        activation: MatrixView,
    },
    RowSum {
        m: MatrixView,
        result: MatrixView,
        decay: f32,
        scale: f32,
    },
    ElementWiseSum {
        a: MatrixView,
        b: MatrixView,
        result: MatrixView,
        scale_a: f32,
        scale_b: f32,
    },
    /// Writes `work.groups` partial sums to `scratch[0..groups]`.
    Reduce {
        kind: ReduceKind,
        x: MatrixView,
        y: Option<MatrixView>,
        scratch: MatrixView,
    },
    Scale {
        m: MatrixView,
        scalar: f32,
    },
}

impl KernelOp {
    /// Kernel name, used for pipeline lookup and logging.
    pub fn name(&self) -> &'static str {
        match self {
            KernelOp::MatMul { .. } => "matmul",
            KernelOp::Softmax { .. } => "softmax",
            KernelOp::Subtract { .. } => "subtract",
            KernelOp::SigmoidDerivative { .. } => "sigmoid_derivative",
            KernelOp::RowSum { .. } => "row_sum",
            KernelOp::ElementWiseSum { .. } => "elementwise_sum",
            KernelOp::Reduce { .. } => "reduce",
            KernelOp::Scale { .. } => "scale",
        }
    }
}

/// Launch geometry chosen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    /// Square tile edge for matmul; 0 for the other kernels.
    pub tile: usize,
    /// Threads per work-group.
    pub group_size: usize,
    /// Number of work-groups.
    pub groups: usize,
}

/// A kernel plus the geometry to run it with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelLaunch {
    pub op: KernelOp,
    pub work: WorkSize,
}

/// Tile edge for a `rows × cols` output: the largest of 16/8/4 that the
/// smaller dimension fills.
pub fn matmul_tile(rows: usize, cols: usize) -> usize {
    let smaller = rows.min(cols);
    if smaller >= 16 {
        16
    } else if smaller >= 8 {
        8
    } else {
        4
    }
}

/// Number of work-groups needed to cover `total` items.
#[inline]
pub fn workgroup_count(total: usize, group_size: usize) -> usize {
    total.div_ceil(group_size).max(1)
}

/// Work-group count for a reduction over `total` elements, capped at
/// [`MAX_PARTIALS`].
#[inline]
pub fn reduce_groups(total: usize) -> usize {
    workgroup_count(total, REDUCE_GROUP_SIZE).min(MAX_PARTIALS)
}

/// Validates, sizes and forwards kernel launches to a backend.
pub struct Dispatcher {
    backend: Box<dyn ComputeBackend>,
    launches: u64,
}

impl Dispatcher {
    pub fn new(backend: Box<dyn ComputeBackend>) -> Self {
        log::info!("Compute backend: {}", backend.name());
        Self {
            backend,
            launches: 0,
        }
    }

    #[inline]
    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut dyn ComputeBackend {
        self.backend.as_mut()
    }

    /// Kernels launched so far.
    pub fn launch_count(&self) -> u64 {
        self.launches
    }

    fn launch(&mut self, op: KernelOp, work: WorkSize) -> FlatnetResult<()> {
        self.launches += 1;
        self.backend.launch(&KernelLaunch { op, work })
    }

    fn elementwise_work(len: usize) -> WorkSize {
        WorkSize {
            tile: 0,
            group_size: WORKGROUP_SIZE,
            groups: workgroup_count(len, WORKGROUP_SIZE),
        }
    }

    /// Fused matrix multiply.
    ///
    /// # Panics
    ///
    /// If `A.cols != B.rows` or `C` is not `A.rows × B.cols` (logical shapes),
    /// or if a bias view is not `1 × C.cols`.
    pub fn matmul(
        &mut self,
        a: MatrixView,
        b: MatrixView,
        c: MatrixView,
        bias: Option<MatrixView>,
        mode: MatMulMode,
    ) -> FlatnetResult<()> {
        assert_eq!(
            a.logical_cols(),
            b.logical_rows(),
            "matmul: A is {:?}, B is {:?}",
            a.shape(),
            b.shape()
        );
        assert_eq!(
            c.shape(),
            [a.logical_rows(), b.logical_cols()],
            "matmul: C has the wrong shape"
        );
        assert!(!c.transposed, "matmul: C must not be transposed");
        if let Some(bias) = bias {
            assert_eq!(bias.len(), c.cols, "matmul: bias must be 1 x C.cols");
        }
        let tile = matmul_tile(c.rows, c.cols);
        let work = WorkSize {
            tile,
            group_size: tile * tile,
            groups: c.rows.div_ceil(tile) * c.cols.div_ceil(tile),
        };
        self.launch(
            KernelOp::MatMul {
                a,
                b,
                c,
                bias,
                mode,
            },
            work,
        )
    }

    /// Row-wise softmax in place.
    pub fn softmax(&mut self, m: MatrixView) -> FlatnetResult<()> {
        assert!(!m.transposed, "softmax: view must not be transposed");
        let work = Self::elementwise_work(m.rows);
        self.launch(KernelOp::Softmax { m }, work)
    }

    /// `result := x - y`.
    pub fn subtract(&mut self, x: MatrixView, y: MatrixView, result: MatrixView) -> FlatnetResult<()> {
        assert_eq!(x.shape(), y.shape(), "subtract: operand shapes differ");
        assert_eq!(x.shape(), result.shape(), "subtract: result shape differs");
        let work = Self::elementwise_work(result.len());
        self.launch(KernelOp::Subtract { x, y, result }, work)
    }

    /// `delta := delta ⊙ a ⊙ (1 - a)` in place.
    pub fn sigmoid_derivative(&mut self, delta: MatrixView, activation: MatrixView) -> FlatnetResult<()> {
        assert_eq!(
            delta.shape(),
            activation.shape(),
            "sigmoid_derivative: shapes differ"
        );
        let work = Self::elementwise_work(delta.len());
        self.launch(KernelOp::SigmoidDerivative { delta, activation }, work)
    }

    /// `result := decay·result + scale·(column sums of m)`.
    pub fn row_sum(&mut self, m: MatrixView, result: MatrixView, decay: f32, scale: f32) -> FlatnetResult<()> {
        assert_eq!(
            result.len(),
            m.logical_cols(),
            "row_sum: result must be 1 x M.cols"
        );
        let work = Self::elementwise_work(m.logical_cols());
        self.launch(
            KernelOp::RowSum {
                m,
                result,
                decay,
                scale,
            },
            work,
        )
    }

    /// `result := scale_a·a + scale_b·b`.
    pub fn elementwise_sum(
        &mut self,
        a: MatrixView,
        b: MatrixView,
        result: MatrixView,
        scale_a: f32,
        scale_b: f32,
    ) -> FlatnetResult<()> {
        assert_eq!(a.shape(), b.shape(), "elementwise_sum: operand shapes differ");
        assert_eq!(a.shape(), result.shape(), "elementwise_sum: result shape differs");
        let work = Self::elementwise_work(result.len());
        self.launch(
            KernelOp::ElementWiseSum {
                a,
                b,
                result,
                scale_a,
                scale_b,
            },
            work,
        )
    }

    /// `m := scalar·m` in place.
    pub fn scale(&mut self, m: MatrixView, scalar: f32) -> FlatnetResult<()> {
        let work = Self::elementwise_work(m.len());
        self.launch(KernelOp::Scale { m, scalar }, work)
    }

    fn reduce(
        &mut self,
        kind: ReduceKind,
        x: MatrixView,
        y: Option<MatrixView>,
        scratch: &mut Buffer,
    ) -> FlatnetResult<f32> {
        let groups = reduce_groups(x.len());
        assert!(
            scratch.len() >= groups,
            "reduce: scratch holds {} partials, need {}",
            scratch.len(),
            groups
        );
        let work = WorkSize {
            tile: 0,
            group_size: REDUCE_GROUP_SIZE,
            groups,
        };
        let op = KernelOp::Reduce {
            kind,
            x,
            y,
            scratch: scratch.view(1, groups, 0),
        };
        self.launch(op, work)?;
        scratch.read_from_device(self.backend.as_mut())?;
        Ok(scratch.host()[..groups].iter().sum())
    }

    /// Cross-entropy between `targets` and `predictions`.
    ///
    /// Softmax outputs use the categorical form averaged over rows; sigmoid
    /// outputs use the binary form averaged over every element.
    pub fn cross_entropy(
        &mut self,
        targets: MatrixView,
        predictions: MatrixView,
        scratch: &mut Buffer,
        output: OutputActivation,
    ) -> FlatnetResult<f32> {
        assert_eq!(
            targets.shape(),
            predictions.shape(),
            "cross_entropy: shapes differ"
        );
        if targets.is_empty() {
            return Ok(0.0);
        }
        let (kind, denom) = match output {
            OutputActivation::Softmax => (ReduceKind::CategoricalCrossEntropy, targets.logical_rows()),
            OutputActivation::Sigmoid => (ReduceKind::BinaryCrossEntropy, targets.len()),
        };
        let sum = self.reduce(kind, targets, Some(predictions), scratch)?;
        Ok(sum / denom as f32)
    }

    /// Sum of squares of every element of `m`.
    pub fn l2_norm(&mut self, m: MatrixView, scratch: &mut Buffer) -> FlatnetResult<f32> {
        if m.is_empty() {
            return Ok(0.0);
        }
        self.reduce(ReduceKind::SquaredSum, m, None, scratch)
    }

    /// Blocks until the backend has drained its queue.
    pub fn finish(&mut self) -> FlatnetResult<()> {
        self.backend.finish()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend.name())
            .field("launches", &self.launches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Box::new(CpuBackend::new()))
    }

    #[test]
    fn test_matmul_tile() {
        assert_eq!(matmul_tile(1, 100), 4);
        assert_eq!(matmul_tile(8, 100), 8);
        assert_eq!(matmul_tile(128, 64), 16);
    }

    #[test]
    fn test_reduce_groups() {
        assert_eq!(reduce_groups(0), 1);
        assert_eq!(reduce_groups(256), 1);
        assert_eq!(reduce_groups(257), 2);
        assert_eq!(reduce_groups(usize::MAX / 2), MAX_PARTIALS);
    }

    #[test]
    fn test_reduce_terms() {
        assert_eq!(ReduceKind::CategoricalCrossEntropy.term(0.0, 0.0), 0.0);
        assert!((ReduceKind::CategoricalCrossEntropy.term(1.0, 0.5) - 2f32.ln()).abs() < 1e-6);
        assert_eq!(ReduceKind::BinaryCrossEntropy.term(1.0, 1.0), 0.0);
        assert_eq!(ReduceKind::BinaryCrossEntropy.term(0.0, 0.0), 0.0);
        assert_eq!(ReduceKind::SquaredSum.term(-3.0, 0.0), 9.0);
    }

    #[test]
    fn test_matmul_plain() {
        let mut d = dispatcher();
        // A = [1 2; 3 4], B = [5 6; 7 8]
        let mut buf = Buffer::create(
            "ab",
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 0.0, 0.0, 0.0, 0.0],
            d.backend_mut(),
        )
        .unwrap();
        let a = buf.view(2, 2, 0);
        let b = buf.view(2, 2, 4);
        let c = buf.view(2, 2, 8);
        d.matmul(
            a,
            b,
            c,
            None,
            MatMulMode::Forward {
                activation: Activation::Identity,
            },
        )
        .unwrap();
        buf.read_from_device(d.backend_mut()).unwrap();
        assert_eq!(&buf.host()[8..], &[19.0, 22.0, 43.0, 50.0]);
        assert_eq!(d.launch_count(), 1);
    }

    #[test]
    fn test_matmul_transposed_accumulate() {
        let mut d = dispatcher();
        // A stored 2x2 = [1 2; 3 4], read as A^T = [1 3; 2 4]; B = I
        let mut buf = Buffer::create(
            "abt",
            vec![1.0, 2.0, 3.0, 4.0, 1.0, 0.0, 0.0, 1.0, 10.0, 10.0, 10.0, 10.0],
            d.backend_mut(),
        )
        .unwrap();
        let a = buf.view(2, 2, 0).t();
        let b = buf.view(2, 2, 4);
        let c = buf.view(2, 2, 8);
        d.matmul(
            a,
            b,
            c,
            None,
            MatMulMode::Accumulate {
                decay: 0.5,
                scale: 2.0,
            },
        )
        .unwrap();
        buf.read_from_device(d.backend_mut()).unwrap();
        // 0.5*10 + 2*[1 3; 2 4]
        assert_eq!(&buf.host()[8..], &[7.0, 11.0, 9.0, 13.0]);
    }

    #[test]
    #[should_panic(expected = "matmul")]
    fn test_matmul_shape_violation_panics() {
        let mut d = dispatcher();
        let buf = Buffer::create("bad", vec![0.0; 32], d.backend_mut()).unwrap();
        let a = buf.view(2, 3, 0);
        let b = buf.view(2, 3, 6);
        let c = buf.view(2, 3, 12);
        let _ = d.matmul(
            a,
            b,
            c,
            None,
            MatMulMode::Forward {
                activation: Activation::Sigmoid,
            },
        );
    }

    #[test]
    fn test_l2_norm() {
        let mut d = dispatcher();
        let data: Vec<f32> = (0..1000).map(|i| (i % 3) as f32).collect();
        let expected: f32 = data.iter().map(|x| x * x).sum();
        let buf = Buffer::create("w", data, d.backend_mut()).unwrap();
        let mut scratch = Buffer::zeros("scratch", MAX_PARTIALS, d.backend_mut()).unwrap();
        let got = d.l2_norm(buf.view(1, 1000, 0), &mut scratch).unwrap();
        assert!((got - expected).abs() < 1e-3);
    }
}
