// block_matrix.rs — Block-sparse matrix algebra
//
// A matrix represented as a grid of typed sub-blocks to exploit structural
// sparsity when assembling large linear-algebra expressions: a Zero cell
// holds no storage, a One cell is an implicit identity of known dimension,
// and only Dense cells carry data. Every operation must match the result
// of materializing Zero → zero matrix and One → identity, and touches only
// the non-Zero block pairs.
//
// Dimension mismatches and out-of-range cell indices are contract
// violations (assertions), not recoverable errors.

use nalgebra::DMatrix;
use std::ops::{Add, AddAssign, Mul, MulAssign, Sub, SubAssign};

// ── Cell type ──────────────────────────────────────────────────────────────

/// One cell of the block grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Zero,
    /// Implicit identity of the given dimension.
    One(usize),
    Dense(DMatrix<f64>),
}

impl Block {
    pub fn is_zero(&self) -> bool {
        matches!(self, Block::Zero)
    }

    /// Materialize to a dense matrix; `None` for Zero (shape unknown).
    fn to_dense(&self) -> Option<DMatrix<f64>> {
        match self {
            Block::Zero => None,
            Block::One(dim) => Some(DMatrix::identity(*dim, *dim)),
            Block::Dense(m) => Some(m.clone()),
        }
    }

    fn shape(&self) -> Option<(usize, usize)> {
        match self {
            Block::Zero => None,
            Block::One(dim) => Some((*dim, *dim)),
            Block::Dense(m) => Some((m.nrows(), m.ncols())),
        }
    }
}

// ── Block matrix ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockMatrix {
    n_rows: usize,
    n_cols: usize,
    cells: Vec<Block>,
}

impl BlockMatrix {
    /// An all-Zero grid of the given shape.
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            cells: vec![Block::Zero; n_rows * n_cols],
        }
    }

    /// A 1×1 grid holding one dense block.
    pub fn from_dense(value: DMatrix<f64>) -> Self {
        let mut m = Self::new(1, 1);
        m.set_dense(0, 0, value);
        m
    }

    /// Reset to an all-Zero grid of the given shape.
    pub fn init(&mut self, n_rows: usize, n_cols: usize) {
        self.n_rows = n_rows;
        self.n_cols = n_cols;
        self.cells.clear();
        self.cells.resize(n_rows * n_cols, Block::Zero);
    }

    pub fn num_rows(&self) -> usize {
        self.n_rows
    }

    pub fn num_cols(&self) -> usize {
        self.n_cols
    }

    fn at(&self, r: usize, c: usize) -> usize {
        assert!(r < self.n_rows && c < self.n_cols, "cell index out of range");
        r * self.n_cols + c
    }

    pub fn cell(&self, r: usize, c: usize) -> &Block {
        &self.cells[self.at(r, c)]
    }

    pub fn set_dense(&mut self, r: usize, c: usize, value: DMatrix<f64>) {
        let i = self.at(r, c);
        self.cells[i] = Block::Dense(value);
    }

    pub fn set_identity(&mut self, r: usize, c: usize, dim: usize) {
        let i = self.at(r, c);
        self.cells[i] = Block::One(dim);
    }

    /// Accumulate a dense block; Zero and One cells promote to Dense.
    pub fn add_dense(&mut self, r: usize, c: usize, value: DMatrix<f64>) {
        let i = self.at(r, c);
        self.cells[i] = match &self.cells[i] {
            Block::Zero => Block::Dense(value),
            other => {
                let base = other.to_dense().expect("non-zero cell");
                assert_eq!(
                    base.shape(),
                    value.shape(),
                    "add_dense shape mismatch at ({r},{c})"
                );
                Block::Dense(base + value)
            }
        };
    }

    /// The dense content of a cell, or a zero matrix of the expected shape
    /// for a Zero cell. Shape mismatch on a non-Zero cell is a contract
    /// violation.
    pub fn sub_block(&self, r: usize, c: usize, n_r: usize, n_c: usize) -> DMatrix<f64> {
        match self.cell(r, c) {
            Block::Zero => DMatrix::zeros(n_r, n_c),
            other => {
                let m = other.to_dense().expect("non-zero cell");
                assert_eq!(
                    m.shape(),
                    (n_r, n_c),
                    "sub_block shape mismatch at ({r},{c})"
                );
                m
            }
        }
    }

    // ── Element-wise maps ──────────────────────────────────────────────

    /// Element-wise absolute value; One cells stay identity.
    pub fn get_absolute(&self) -> BlockMatrix {
        self.map_cells(|b| match b {
            Block::Zero => Block::Zero,
            Block::One(dim) => Block::One(*dim),
            Block::Dense(m) => Block::Dense(m.map(f64::abs)),
        })
    }

    /// Element-wise positive part; One cells stay identity.
    pub fn get_positive(&self) -> BlockMatrix {
        self.map_cells(|b| match b {
            Block::Zero => Block::Zero,
            Block::One(dim) => Block::One(*dim),
            Block::Dense(m) => Block::Dense(m.map(|x| if x > 0.0 { x } else { 0.0 })),
        })
    }

    /// Element-wise negative part; only Dense cells contribute (there is
    /// no negative identity block), One cells are dropped.
    pub fn get_negative(&self) -> BlockMatrix {
        self.map_cells(|b| match b {
            Block::Dense(m) => Block::Dense(m.map(|x| if x < 0.0 { x } else { 0.0 })),
            _ => Block::Zero,
        })
    }

    fn map_cells(&self, f: impl Fn(&Block) -> Block) -> BlockMatrix {
        BlockMatrix {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            cells: self.cells.iter().map(f).collect(),
        }
    }

    // ── Transpose ──────────────────────────────────────────────────────

    /// Swap index roles cell-wise, transposing each dense sub-block; type
    /// tags carry over unchanged.
    pub fn transpose(&self) -> BlockMatrix {
        let mut result = BlockMatrix::new(self.n_cols, self.n_rows);
        for r in 0..self.n_rows {
            for c in 0..self.n_cols {
                let i = result.at(c, r);
                result.cells[i] = match self.cell(r, c) {
                    Block::Zero => Block::Zero,
                    Block::One(dim) => Block::One(*dim),
                    Block::Dense(m) => Block::Dense(m.transpose()),
                };
            }
        }
        result
    }

    // ── Out-parameter factories ────────────────────────────────────────

    pub fn mat_mat_add(m1: &BlockMatrix, m2: &BlockMatrix, result: &mut BlockMatrix) {
        *result = m1 + m2;
    }

    pub fn mat_mat_sub(m1: &BlockMatrix, m2: &BlockMatrix, result: &mut BlockMatrix) {
        *result = m1 - m2;
    }

    pub fn mat_mat_mul(m1: &BlockMatrix, m2: &BlockMatrix, result: &mut BlockMatrix) {
        *result = m1 * m2;
    }

    /// Fused `m1ᵀ · m2` without materializing the transpose.
    pub fn mat_t_mat_mul(m1: &BlockMatrix, m2: &BlockMatrix, result: &mut BlockMatrix) {
        assert_eq!(m1.num_rows(), m2.num_rows(), "matT_mat_mul row mismatch");
        result.init(m1.num_cols(), m2.num_cols());
        for i in 0..result.n_rows {
            for k in 0..m1.num_rows() {
                let left = m1.cell(k, i);
                if left.is_zero() {
                    continue;
                }
                for j in 0..result.n_cols {
                    let right = m2.cell(k, j);
                    if right.is_zero() {
                        continue;
                    }
                    let contribution = transposed_product(left, right);
                    let at = result.at(i, j);
                    accumulate(&mut result.cells[at], contribution);
                }
            }
        }
    }
}

// ── Cell-level product helpers ─────────────────────────────────────────────

/// Contribution of one `left · right` block pair.
fn product(left: &Block, right: &Block) -> Block {
    match (left, right) {
        (Block::One(dim), Block::One(_)) => Block::One(*dim),
        (Block::One(_), Block::Dense(b)) => Block::Dense(b.clone()),
        (Block::Dense(a), Block::One(_)) => Block::Dense(a.clone()),
        (Block::Dense(a), Block::Dense(b)) => {
            assert_eq!(a.ncols(), b.nrows(), "block product inner dimension");
            Block::Dense(a * b)
        }
        _ => Block::Zero,
    }
}

/// Contribution of one `leftᵀ · right` block pair.
fn transposed_product(left: &Block, right: &Block) -> Block {
    match (left, right) {
        (Block::One(dim), Block::One(_)) => Block::One(*dim),
        (Block::One(_), Block::Dense(b)) => Block::Dense(b.clone()),
        (Block::Dense(a), Block::One(_)) => Block::Dense(a.transpose()),
        (Block::Dense(a), Block::Dense(b)) => {
            assert_eq!(a.nrows(), b.nrows(), "block product inner dimension");
            Block::Dense(a.transpose() * b)
        }
        _ => Block::Zero,
    }
}

/// Fold a product contribution into a result cell. A One contribution over
/// a Zero cell stays One; any other non-Zero combination realizes Dense.
fn accumulate(cell: &mut Block, contribution: Block) {
    match contribution {
        Block::Zero => {}
        contribution => {
            *cell = match &*cell {
                Block::Zero => contribution,
                existing => {
                    let a = existing.to_dense().expect("non-zero cell");
                    let b = contribution.to_dense().expect("non-zero contribution");
                    assert_eq!(a.shape(), b.shape(), "accumulation shape mismatch");
                    Block::Dense(a + b)
                }
            };
        }
    }
}

// ── Arithmetic operators ───────────────────────────────────────────────────

impl Add for &BlockMatrix {
    type Output = BlockMatrix;

    fn add(self, rhs: &BlockMatrix) -> BlockMatrix {
        assert_eq!(
            (self.n_rows, self.n_cols),
            (rhs.n_rows, rhs.n_cols),
            "block grid shape mismatch"
        );
        let mut result = rhs.clone();
        for i in 0..self.cells.len() {
            match (&self.cells[i], &result.cells[i]) {
                (Block::Zero, _) => {}
                (lhs, Block::Zero) => result.cells[i] = lhs.clone(),
                (lhs, rhs_cell) => {
                    let a = lhs.to_dense().expect("non-zero");
                    let b = rhs_cell.to_dense().expect("non-zero");
                    assert_eq!(a.shape(), b.shape(), "block shape mismatch");
                    result.cells[i] = Block::Dense(a + b);
                }
            }
        }
        result
    }
}

impl Sub for &BlockMatrix {
    type Output = BlockMatrix;

    fn sub(self, rhs: &BlockMatrix) -> BlockMatrix {
        assert_eq!(
            (self.n_rows, self.n_cols),
            (rhs.n_rows, rhs.n_cols),
            "block grid shape mismatch"
        );
        let mut result = self.clone();
        for i in 0..result.cells.len() {
            match (&result.cells[i], &rhs.cells[i]) {
                (_, Block::Zero) => {}
                (Block::Zero, rhs_cell) => {
                    let b = rhs_cell.to_dense().expect("non-zero");
                    result.cells[i] = Block::Dense(-b);
                }
                (lhs, rhs_cell) => {
                    let a = lhs.to_dense().expect("non-zero");
                    let b = rhs_cell.to_dense().expect("non-zero");
                    assert_eq!(a.shape(), b.shape(), "block shape mismatch");
                    result.cells[i] = Block::Dense(a - b);
                }
            }
        }
        result
    }
}

impl AddAssign<&BlockMatrix> for BlockMatrix {
    fn add_assign(&mut self, rhs: &BlockMatrix) {
        *self = &*self + rhs;
    }
}

impl AddAssign<BlockMatrix> for BlockMatrix {
    fn add_assign(&mut self, rhs: BlockMatrix) {
        *self = &*self + &rhs;
    }
}

impl SubAssign<&BlockMatrix> for BlockMatrix {
    fn sub_assign(&mut self, rhs: &BlockMatrix) {
        *self = &*self - rhs;
    }
}

impl SubAssign<BlockMatrix> for BlockMatrix {
    fn sub_assign(&mut self, rhs: BlockMatrix) {
        *self = &*self - &rhs;
    }
}

impl Mul for &BlockMatrix {
    type Output = BlockMatrix;

    fn mul(self, rhs: &BlockMatrix) -> BlockMatrix {
        assert_eq!(self.n_cols, rhs.n_rows, "block grid inner dimension");
        let mut result = BlockMatrix::new(self.n_rows, rhs.n_cols);
        for i in 0..self.n_rows {
            for k in 0..self.n_cols {
                let left = self.cell(i, k);
                if left.is_zero() {
                    continue;
                }
                for j in 0..rhs.n_cols {
                    let right = rhs.cell(k, j);
                    if right.is_zero() {
                        continue;
                    }
                    let contribution = product(left, right);
                    let at = result.at(i, j);
                    accumulate(&mut result.cells[at], contribution);
                }
            }
        }
        result
    }
}

/// Scalar multiply: scales every non-Zero cell and promotes One to Dense.
impl MulAssign<f64> for BlockMatrix {
    fn mul_assign(&mut self, scalar: f64) {
        for cell in &mut self.cells {
            if let Some(m) = cell.to_dense() {
                *cell = Block::Dense(m * scalar);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense2(a: f64, b: f64, c: f64, d: f64) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[a, b, c, d])
    }

    #[test]
    fn zero_is_additive_identity_and_one_realizes_on_add() {
        let mut a = BlockMatrix::new(1, 2);
        a.set_identity(0, 0, 2);
        let mut b = BlockMatrix::new(1, 2);
        b.set_dense(0, 0, dense2(1.0, 2.0, 3.0, 4.0));
        b.set_dense(0, 1, dense2(9.0, 0.0, 0.0, 9.0));

        let sum = &a + &b;
        assert_eq!(
            sum.sub_block(0, 0, 2, 2),
            dense2(2.0, 2.0, 3.0, 5.0),
            "One + Dense must realize the identity"
        );
        // a(0,1) is Zero, so b's cell carries over untouched.
        assert_eq!(sum.sub_block(0, 1, 2, 2), dense2(9.0, 0.0, 0.0, 9.0));
    }

    #[test]
    fn subtraction_from_zero_negates() {
        let zero = BlockMatrix::new(1, 1);
        let mut b = BlockMatrix::new(1, 1);
        b.set_identity(0, 0, 2);
        let diff = &zero - &b;
        assert_eq!(diff.sub_block(0, 0, 2, 2), dense2(-1.0, 0.0, 0.0, -1.0));
    }

    #[test]
    fn one_times_one_stays_one() {
        let mut a = BlockMatrix::new(1, 1);
        a.set_identity(0, 0, 3);
        let mut b = BlockMatrix::new(1, 1);
        b.set_identity(0, 0, 3);
        let p = &a * &b;
        assert_eq!(*p.cell(0, 0), Block::One(3));
    }

    #[test]
    fn product_skips_zero_pairs() {
        let mut a = BlockMatrix::new(2, 2);
        a.set_dense(0, 0, dense2(1.0, 0.0, 0.0, 1.0));
        let b = BlockMatrix::new(2, 2);
        let p = &a * &b;
        for r in 0..2 {
            for c in 0..2 {
                assert!(p.cell(r, c).is_zero());
            }
        }
    }

    #[test]
    fn add_dense_promotes_one() {
        let mut a = BlockMatrix::new(1, 1);
        a.set_identity(0, 0, 2);
        a.add_dense(0, 0, dense2(0.0, 1.0, 1.0, 0.0));
        assert_eq!(a.sub_block(0, 0, 2, 2), dense2(1.0, 1.0, 1.0, 1.0));
    }

    #[test]
    fn scalar_scale_promotes_one() {
        let mut a = BlockMatrix::new(1, 1);
        a.set_identity(0, 0, 2);
        a *= 3.0;
        assert_eq!(a.sub_block(0, 0, 2, 2), dense2(3.0, 0.0, 0.0, 3.0));
    }

    #[test]
    fn negative_part_drops_identity_blocks() {
        let mut a = BlockMatrix::new(1, 2);
        a.set_identity(0, 0, 2);
        a.set_dense(0, 1, dense2(1.0, -2.0, -0.5, 3.0));
        let neg = a.get_negative();
        assert!(neg.cell(0, 0).is_zero());
        assert_eq!(neg.sub_block(0, 1, 2, 2), dense2(0.0, -2.0, -0.5, 0.0));
    }

    #[test]
    fn compound_assign_matches_binary_op() {
        let mut a = BlockMatrix::new(1, 1);
        a.set_dense(0, 0, dense2(1.0, 2.0, 3.0, 4.0));
        let doubled = &a + &a;
        let copy = a.clone();
        a += copy;
        assert_eq!(a, doubled);
    }

    #[test]
    fn transpose_preserves_tags() {
        let mut a = BlockMatrix::new(2, 1);
        a.set_identity(0, 0, 2);
        a.set_dense(1, 0, DMatrix::from_row_slice(1, 2, &[5.0, 6.0]));
        let t = a.transpose();
        assert_eq!(*t.cell(0, 0), Block::One(2));
        assert_eq!(
            t.sub_block(0, 1, 2, 1),
            DMatrix::from_row_slice(2, 1, &[5.0, 6.0])
        );
    }

    #[test]
    #[should_panic(expected = "sub_block shape mismatch")]
    fn shape_mismatch_is_a_contract_violation() {
        let mut a = BlockMatrix::new(1, 1);
        a.set_dense(0, 0, dense2(1.0, 0.0, 0.0, 1.0));
        let _ = a.sub_block(0, 0, 3, 3);
    }
}
