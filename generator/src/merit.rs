// merit.rs — Merit-function assembly for the line-search step acceptance
//
// Combines the objective value at a trial step with weighted L1 penalties
// on the dynamic residual and on the active bound/constraint residuals.
// Multipliers and residuals arrive as block matrices from the QP stage;
// every term is one absolute/positive/negative map, one fused transpose-
// multiply, and one scalar extraction.

use crate::block_matrix::BlockMatrix;

/// Fixed penalty weight of the L1 terms.
pub const KAPPA: f64 = 1.2;

/// Multiplier and residual blocks of the current QP solution.
#[derive(Debug, Clone, Default)]
pub struct QpResiduals {
    /// Present only for dynamic NLPs (multiple shooting).
    pub lambda_dynamic: Option<(BlockMatrix, BlockMatrix)>,
    pub lambda_bound: BlockMatrix,
    pub upper_bound_residuum: BlockMatrix,
    pub lower_bound_residuum: BlockMatrix,
    pub lambda_constraint: BlockMatrix,
    pub upper_constraint_residuum: BlockMatrix,
    pub lower_constraint_residuum: BlockMatrix,
}

/// Scalar value of one L1 penalty term: `|lambda|ᵀ · part`, extracted from
/// the (0,0) sub-block.
fn penalty(lambda_abs: &BlockMatrix, part: &BlockMatrix, scratch: &mut BlockMatrix) -> f64 {
    if lambda_abs.num_rows() == 0 || part.num_rows() == 0 {
        return 0.0;
    }
    BlockMatrix::mat_t_mat_mul(lambda_abs, part, scratch);
    scratch.sub_block(0, 0, 1, 1)[(0, 0)]
}

/// Merit value of a trial step: objective plus the weighted penalty terms.
///
/// Bound and constraint violations enter through the negative part of the
/// upper residual (subtracted) and the positive part of the lower residual
/// (added), so every violated side increases the merit value.
pub fn merit_value(objective: f64, qp: &QpResiduals) -> f64 {
    let mut result = objective;
    let mut scratch = BlockMatrix::default();

    if let Some((lambda, residuum)) = &qp.lambda_dynamic {
        let term = penalty(&lambda.get_absolute(), &residuum.get_absolute(), &mut scratch);
        result += KAPPA * term;
    }

    let lambda_bound_abs = qp.lambda_bound.get_absolute();
    result -= KAPPA
        * penalty(
            &lambda_bound_abs,
            &qp.upper_bound_residuum.get_negative(),
            &mut scratch,
        );
    result += KAPPA
        * penalty(
            &lambda_bound_abs,
            &qp.lower_bound_residuum.get_positive(),
            &mut scratch,
        );

    let lambda_constraint_abs = qp.lambda_constraint.get_absolute();
    result -= KAPPA
        * penalty(
            &lambda_constraint_abs,
            &qp.upper_constraint_residuum.get_negative(),
            &mut scratch,
        );
    result += KAPPA
        * penalty(
            &lambda_constraint_abs,
            &qp.lower_constraint_residuum.get_positive(),
            &mut scratch,
        );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn column(values: &[f64]) -> BlockMatrix {
        let mut m = BlockMatrix::new(1, 1);
        m.set_dense(0, 0, DMatrix::from_column_slice(values.len(), 1, values));
        m
    }

    #[test]
    fn feasible_point_adds_no_penalty() {
        // Upper residuals positive (slack), lower residuals negative (slack).
        let qp = QpResiduals {
            lambda_dynamic: None,
            lambda_bound: column(&[1.0, -2.0]),
            upper_bound_residuum: column(&[0.5, 0.25]),
            lower_bound_residuum: column(&[-0.5, -0.25]),
            lambda_constraint: column(&[3.0]),
            upper_constraint_residuum: column(&[1.0]),
            lower_constraint_residuum: column(&[-1.0]),
        };
        let value = merit_value(7.5, &qp);
        assert!((value - 7.5).abs() < 1e-14);
    }

    #[test]
    fn violated_bounds_increase_the_merit() {
        // Upper residual -0.1 violated against multiplier |-2| = 2:
        //   -κ · (2 · (-0.1)) = +0.24.
        // Lower residual +0.3 violated against multiplier |1| = 1:
        //   +κ · (1 · 0.3) = +0.36.
        let qp = QpResiduals {
            lambda_dynamic: None,
            lambda_bound: column(&[1.0, -2.0]),
            upper_bound_residuum: column(&[0.5, -0.1]),
            lower_bound_residuum: column(&[0.3, -0.25]),
            ..Default::default()
        };
        let value = merit_value(0.0, &qp);
        assert!((value - (0.24 + 0.36)).abs() < 1e-12, "got {value}");
    }

    #[test]
    fn dynamic_residual_penalty_uses_absolute_values() {
        let qp = QpResiduals {
            lambda_dynamic: Some((column(&[-2.0, 1.0]), column(&[0.5, -0.5]))),
            ..Default::default()
        };
        // κ · (|λ|ᵀ|r|) = 1.2 · (2·0.5 + 1·0.5) = 1.8
        let value = merit_value(1.0, &qp);
        assert!((value - 2.8).abs() < 1e-12, "got {value}");
    }

    #[test]
    fn zero_blocks_contribute_nothing() {
        let qp = QpResiduals::default();
        assert_eq!(merit_value(3.0, &qp), 3.0);
    }
}
