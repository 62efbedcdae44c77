//! Uniform block shared by every kernel.
//!
//! `#[repr(C)]` so the field order matches the WGSL `Params` struct; all
//! members are 4-byte scalars and the total is a multiple of 16 bytes.

use bytemuck::{Pod, Zeroable};

use crate::kernels::{Activation, KernelLaunch, KernelOp, MatMulMode, ReduceKind};
use crate::view::MatrixView;

/// `flags` bit: matmul adds a bias row.
pub const FLAG_BIAS: u32 = 1;
/// `flags` bit: matmul applies the logistic sigmoid.
pub const FLAG_SIGMOID: u32 = 2;
/// `flags` bit: matmul accumulates into C.
pub const FLAG_ACCUMULATE: u32 = 4;

/// Per-launch parameters.
///
/// # Layout
///
/// Total size: 96 bytes (6 × vec4).
///
/// ```text
/// Offset  Field
/// 0       a_offset a_rows a_cols a_trans
/// 16      b_offset b_rows b_cols b_trans
/// 32      c_offset c_rows c_cols c_trans
/// 48      bias_offset flags count groups
/// 64      alpha beta a_slot b_slot
/// 80      c_slot bias_slot kind _pad
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct KernelUniforms {
    pub a_offset: u32,
    pub a_rows: u32,
    pub a_cols: u32,
    pub a_trans: u32,

    pub b_offset: u32,
    pub b_rows: u32,
    pub b_cols: u32,
    pub b_trans: u32,

    pub c_offset: u32,
    pub c_rows: u32,
    pub c_cols: u32,
    pub c_trans: u32,

    pub bias_offset: u32,
    pub flags: u32,
    /// Logical element count the kernel iterates over.
    pub count: u32,
    /// Work-groups launched (reductions stride by `groups * group_size`).
    pub groups: u32,

    /// Decay / first scale / scalar.
    pub alpha: f32,
    /// Second scale.
    pub beta: f32,
    pub a_slot: u32,
    pub b_slot: u32,

    pub c_slot: u32,
    pub bias_slot: u32,
    /// [`ReduceKind`] discriminant for the reduction kernel.
    pub kind: u32,
    pub _pad: u32,
}

/// Binding slot of each operand, assigned by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slots {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub bias: u32,
}

fn set_a(u: &mut KernelUniforms, v: &MatrixView) {
    u.a_offset = v.offset as u32;
    u.a_rows = v.rows as u32;
    u.a_cols = v.cols as u32;
    u.a_trans = v.transposed as u32;
}

fn set_b(u: &mut KernelUniforms, v: &MatrixView) {
    u.b_offset = v.offset as u32;
    u.b_rows = v.rows as u32;
    u.b_cols = v.cols as u32;
    u.b_trans = v.transposed as u32;
}

fn set_c(u: &mut KernelUniforms, v: &MatrixView) {
    u.c_offset = v.offset as u32;
    u.c_rows = v.rows as u32;
    u.c_cols = v.cols as u32;
    u.c_trans = v.transposed as u32;
}

pub fn reduce_kind_code(kind: ReduceKind) -> u32 {
    match kind {
        ReduceKind::CategoricalCrossEntropy => 0,
        ReduceKind::BinaryCrossEntropy => 1,
        ReduceKind::SquaredSum => 2,
    }
}

impl KernelUniforms {
    /// Packs a launch descriptor. Operands map onto a/b/c as follows:
    ///
    /// | Kernel | a | b | c |
    /// |--------|---|---|---|
    /// | matmul | A | B | C |
    /// | softmax | | | M |
    /// | subtract | X | Y | result |
    /// | sigmoid_derivative | activation | | delta |
    /// | row_sum | M | | result |
    /// | elementwise_sum | A | B | result |
    /// | reduce | x | y | scratch |
    /// | scale | | | M |
    pub fn from_launch(launch: &KernelLaunch, slots: Slots) -> Self {
        let mut u = KernelUniforms {
            groups: launch.work.groups as u32,
            a_slot: slots.a,
            b_slot: slots.b,
            c_slot: slots.c,
            bias_slot: slots.bias,
            ..Default::default()
        };
        match launch.op {
            KernelOp::MatMul {
                a,
                b,
                c,
                bias,
                mode,
            } => {
                set_a(&mut u, &a);
                set_b(&mut u, &b);
                set_c(&mut u, &c);
                u.count = c.len() as u32;
                if let Some(bias) = bias {
                    u.bias_offset = bias.offset as u32;
                    u.flags |= FLAG_BIAS;
                }
                match mode {
                    MatMulMode::Forward { activation } => {
                        if activation == Activation::Sigmoid {
                            u.flags |= FLAG_SIGMOID;
                        }
                    }
                    MatMulMode::Accumulate { decay, scale } => {
                        u.flags |= FLAG_ACCUMULATE;
                        u.alpha = decay;
                        u.beta = scale;
                    }
                }
            }
            KernelOp::Softmax { m } => {
                set_c(&mut u, &m);
                u.count = m.rows as u32;
            }
            KernelOp::Subtract { x, y, result } => {
                set_a(&mut u, &x);
                set_b(&mut u, &y);
                set_c(&mut u, &result);
                u.count = result.len() as u32;
            }
            KernelOp::SigmoidDerivative { delta, activation } => {
                set_a(&mut u, &activation);
                set_c(&mut u, &delta);
                u.count = delta.len() as u32;
            }
            KernelOp::RowSum {
                m,
                result,
                decay,
                scale,
            } => {
                set_a(&mut u, &m);
                set_c(&mut u, &result);
                u.count = m.logical_cols() as u32;
                u.alpha = decay;
                u.beta = scale;
            }
            KernelOp::ElementWiseSum {
                a,
                b,
                result,
                scale_a,
                scale_b,
            } => {
                set_a(&mut u, &a);
                set_b(&mut u, &b);
                set_c(&mut u, &result);
                u.count = result.len() as u32;
                u.alpha = scale_a;
                u.beta = scale_b;
            }
            KernelOp::Reduce {
                kind,
                x,
                y,
                scratch,
            } => {
                set_a(&mut u, &x);
                if let Some(y) = y {
                    set_b(&mut u, &y);
                }
                set_c(&mut u, &scratch);
                u.count = x.len() as u32;
                u.kind = reduce_kind_code(kind);
            }
            KernelOp::Scale { m, scalar } => {
                set_c(&mut u, &m);
                u.count = m.len() as u32;
                u.alpha = scalar;
            }
        }
        u
    }

    /// Returns the size in bytes.
    pub const fn size_bytes() -> usize {
        std::mem::size_of::<Self>()
    }
}
