//! WGSL source for the compute kernels.
//!
//! Every module is [`PREAMBLE`] followed by one kernel. The matmul kernel is
//! generated per tile edge; the others have fixed work-group sizes matching
//! [`WORKGROUP_SIZE`](crate::kernels::WORKGROUP_SIZE) and
//! [`REDUCE_GROUP_SIZE`](crate::kernels::REDUCE_GROUP_SIZE).
//!
//! # Bind Group
//!
//! - Binding 0-3: `s0`..`s3` operand buffers (storage, read_write)
//! - Binding 4: `p` (uniform) - KernelUniforms

use crate::kernels::{LOG_FLOOR, REDUCE_GROUP_SIZE, WORKGROUP_SIZE};

/// Shared declarations: parameter block, bindings, slot-indexed load/store
/// and view addressing.
pub const PREAMBLE: &str = r#"
// Must match KernelUniforms in Rust
struct Params {
    a_offset: u32, a_rows: u32, a_cols: u32, a_trans: u32,
    b_offset: u32, b_rows: u32, b_cols: u32, b_trans: u32,
    c_offset: u32, c_rows: u32, c_cols: u32, c_trans: u32,
    bias_offset: u32, flags: u32, count: u32, groups: u32,
    alpha: f32, beta: f32, a_slot: u32, b_slot: u32,
    c_slot: u32, bias_slot: u32, kind: u32, _pad: u32,
}

@group(0) @binding(0) var<storage, read_write> s0: array<f32>;
@group(0) @binding(1) var<storage, read_write> s1: array<f32>;
@group(0) @binding(2) var<storage, read_write> s2: array<f32>;
@group(0) @binding(3) var<storage, read_write> s3: array<f32>;
@group(0) @binding(4) var<uniform> p: Params;

const FLAG_BIAS: u32 = 1u;
const FLAG_SIGMOID: u32 = 2u;
const FLAG_ACCUMULATE: u32 = 4u;

fn load(slot: u32, i: u32) -> f32 {
    switch slot {
        case 0u: { return s0[i]; }
        case 1u: { return s1[i]; }
        case 2u: { return s2[i]; }
        default: { return s3[i]; }
    }
}

fn store(slot: u32, i: u32, v: f32) {
    switch slot {
        case 0u: { s0[i] = v; }
        case 1u: { s1[i] = v; }
        case 2u: { s2[i] = v; }
        default: { s3[i] = v; }
    }
}

// Buffer index of logical (i, j) in a view with storage width `cols`.
fn at(offset: u32, cols: u32, trans: u32, i: u32, j: u32) -> u32 {
    if (trans != 0u) {
        return offset + j * cols + i;
    }
    return offset + i * cols + j;
}

fn logical_rows(rows: u32, cols: u32, trans: u32) -> u32 {
    if (trans != 0u) { return cols; }
    return rows;
}

fn logical_cols(rows: u32, cols: u32, trans: u32) -> u32 {
    if (trans != 0u) { return rows; }
    return cols;
}

fn sigmoid(x: f32) -> f32 {
    return 1.0 / (1.0 + exp(-x));
}
"#;

/// Generates the fused matmul kernel for a square `tile × tile` work-group.
///
/// One invocation per element of C: `C[i,j] = act(Σ_k A[i,k]·B[k,j] + bias[j])`
/// or `C[i,j] = alpha·C[i,j] + beta·Σ_k A[i,k]·B[k,j]`.
pub fn matmul_shader(tile: usize) -> String {
    format!(
        r#"{preamble}
@compute @workgroup_size({tile}, {tile}, 1)
fn matmul(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let m = logical_rows(p.a_rows, p.a_cols, p.a_trans);
    let k = logical_cols(p.a_rows, p.a_cols, p.a_trans);
    let n = logical_cols(p.b_rows, p.b_cols, p.b_trans);
    let row = gid.y;
    let col = gid.x;
    if (row >= m || col >= n) {{
        return;
    }}

    var acc = 0.0;
    for (var t = 0u; t < k; t++) {{
        let av = load(p.a_slot, at(p.a_offset, p.a_cols, p.a_trans, row, t));
        let bv = load(p.b_slot, at(p.b_offset, p.b_cols, p.b_trans, t, col));
        acc += av * bv;
    }}

    let ci = p.c_offset + row * p.c_cols + col;
    if ((p.flags & FLAG_ACCUMULATE) != 0u) {{
        store(p.c_slot, ci, p.alpha * load(p.c_slot, ci) + p.beta * acc);
        return;
    }}
    if ((p.flags & FLAG_BIAS) != 0u) {{
        acc += load(p.bias_slot, p.bias_offset + col);
    }}
    if ((p.flags & FLAG_SIGMOID) != 0u) {{
        acc = sigmoid(acc);
    }}
    store(p.c_slot, ci, acc);
}}
"#,
        preamble = PREAMBLE,
        tile = tile
    )
}

/// Element-wise kernels, one invocation per element.
///
/// Linear ids span a 2-D dispatch: `gid.x + gid.y * (nwg.x * WORKGROUP_SIZE)`.
pub fn elementwise_shader() -> String {
    format!(
        r#"{preamble}
const WG: u32 = {wg}u;

fn linear_id(gid: vec3<u32>, nwg: vec3<u32>) -> u32 {{
    return gid.x + gid.y * nwg.x * WG;
}}

// c: M (rows), one invocation per row
@compute @workgroup_size({wg})
fn softmax(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {{
    let r = linear_id(gid, nwg);
    if (r >= p.count) {{
        return;
    }}
    let base = p.c_offset + r * p.c_cols;
    var mx = load(p.c_slot, base);
    for (var j = 1u; j < p.c_cols; j++) {{
        mx = max(mx, load(p.c_slot, base + j));
    }}
    var sum = 0.0;
    for (var j = 0u; j < p.c_cols; j++) {{
        let e = exp(load(p.c_slot, base + j) - mx);
        store(p.c_slot, base + j, e);
        sum += e;
    }}
    for (var j = 0u; j < p.c_cols; j++) {{
        store(p.c_slot, base + j, load(p.c_slot, base + j) / sum);
    }}
}}

// c := a - b
@compute @workgroup_size({wg})
fn subtract(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {{
    let id = linear_id(gid, nwg);
    if (id >= p.count) {{
        return;
    }}
    let cols = logical_cols(p.c_rows, p.c_cols, p.c_trans);
    let i = id / cols;
    let j = id % cols;
    let x = load(p.a_slot, at(p.a_offset, p.a_cols, p.a_trans, i, j));
    let y = load(p.b_slot, at(p.b_offset, p.b_cols, p.b_trans, i, j));
    store(p.c_slot, at(p.c_offset, p.c_cols, p.c_trans, i, j), x - y);
}}

// c (delta) := c * a * (1 - a)
@compute @workgroup_size({wg})
fn sigmoid_derivative(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {{
    let id = linear_id(gid, nwg);
    if (id >= p.count) {{
        return;
    }}
    let cols = logical_cols(p.c_rows, p.c_cols, p.c_trans);
    let i = id / cols;
    let j = id % cols;
    let a = load(p.a_slot, at(p.a_offset, p.a_cols, p.a_trans, i, j));
    let ci = at(p.c_offset, p.c_cols, p.c_trans, i, j);
    store(p.c_slot, ci, load(p.c_slot, ci) * a * (1.0 - a));
}}

// c[j] := alpha * c[j] + beta * sum_i a[i, j], one invocation per column
@compute @workgroup_size({wg})
fn row_sum(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {{
    let j = linear_id(gid, nwg);
    if (j >= p.count) {{
        return;
    }}
    let rows = logical_rows(p.a_rows, p.a_cols, p.a_trans);
    var s = 0.0;
    for (var i = 0u; i < rows; i++) {{
        s += load(p.a_slot, at(p.a_offset, p.a_cols, p.a_trans, i, j));
    }}
    let ci = p.c_offset + j;
    store(p.c_slot, ci, p.alpha * load(p.c_slot, ci) + p.beta * s);
}}

// c := alpha * a + beta * b
@compute @workgroup_size({wg})
fn elementwise_sum(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {{
    let id = linear_id(gid, nwg);
    if (id >= p.count) {{
        return;
    }}
    let cols = logical_cols(p.c_rows, p.c_cols, p.c_trans);
    let i = id / cols;
    let j = id % cols;
    let x = load(p.a_slot, at(p.a_offset, p.a_cols, p.a_trans, i, j));
    let y = load(p.b_slot, at(p.b_offset, p.b_cols, p.b_trans, i, j));
    store(p.c_slot, at(p.c_offset, p.c_cols, p.c_trans, i, j), p.alpha * x + p.beta * y);
}}

// c := alpha * c
@compute @workgroup_size({wg})
fn scale(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {{
    let id = linear_id(gid, nwg);
    if (id >= p.count) {{
        return;
    }}
    let cols = logical_cols(p.c_rows, p.c_cols, p.c_trans);
    let ci = at(p.c_offset, p.c_cols, p.c_trans, id / cols, id % cols);
    store(p.c_slot, ci, p.alpha * load(p.c_slot, ci));
}}
"#,
        preamble = PREAMBLE,
        wg = WORKGROUP_SIZE
    )
}

/// Two-stage reduction, stage one: each work-group writes its partial sum
/// to `c[c_offset + workgroup_id]`. The host adds the partials.
///
/// `kind`: 0 = categorical cross-entropy, 1 = binary cross-entropy,
/// 2 = sum of squares.
pub fn reduce_shader() -> String {
    format!(
        r#"{preamble}
const RG: u32 = {rg}u;
const LOG_FLOOR: f32 = {floor:e};

var<workgroup> partial: array<f32, {rg}>;

fn term(x: f32, y: f32) -> f32 {{
    if (p.kind == 2u) {{
        return x * x;
    }}
    var acc = 0.0;
    if (x != 0.0) {{
        acc -= x * log(max(y, LOG_FLOOR));
    }}
    if (p.kind == 1u && x != 1.0) {{
        acc -= (1.0 - x) * log(max(1.0 - y, LOG_FLOOR));
    }}
    return acc;
}}

@compute @workgroup_size({rg})
fn reduce(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {{
    let cols = logical_cols(p.a_rows, p.a_cols, p.a_trans);
    var acc = 0.0;
    var idx = wid.x * RG + lid.x;
    let stride = p.groups * RG;
    while (idx < p.count) {{
        let i = idx / cols;
        let j = idx % cols;
        let x = load(p.a_slot, at(p.a_offset, p.a_cols, p.a_trans, i, j));
        var y = 0.0;
        if (p.kind != 2u) {{
            y = load(p.b_slot, at(p.b_offset, p.b_cols, p.b_trans, i, j));
        }}
        acc += term(x, y);
        idx += stride;
    }}
    partial[lid.x] = acc;
    workgroupBarrier();

    var s = RG / 2u;
    while (s > 0u) {{
        if (lid.x < s) {{
            partial[lid.x] += partial[lid.x + s];
        }}
        workgroupBarrier();
        s = s / 2u;
    }}

    if (lid.x == 0u) {{
        store(p.c_slot, p.c_offset + wid.x, partial[0]);
    }}
}}
"#,
        preamble = PREAMBLE,
        rg = REDUCE_GROUP_SIZE,
        floor = LOG_FLOOR
    )
}

/// Entry points of [`elementwise_shader`].
pub const ELEMENTWISE_ENTRIES: [&str; 6] = [
    "softmax",
    "subtract",
    "sigmoid_derivative",
    "row_sum",
    "elementwise_sum",
    "scale",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_shader_tile() {
        let src = matmul_shader(8);
        assert!(src.contains("@workgroup_size(8, 8, 1)"));
        assert!(src.contains("fn matmul"));
        assert!(src.contains("struct Params"));
    }

    #[test]
    fn test_elementwise_entries_present() {
        let src = elementwise_shader();
        for entry in ELEMENTWISE_ENTRIES {
            assert!(src.contains(&format!("fn {}(", entry)), "missing {}", entry);
        }
    }

    #[test]
    fn test_reduce_shader_constants() {
        let src = reduce_shader();
        assert!(src.contains(&format!("array<f32, {}>", REDUCE_GROUP_SIZE)));
        assert!(src.contains("workgroupBarrier"));
        assert!(src.contains("const LOG_FLOOR: f32 = 1e-30;"));
    }
}
