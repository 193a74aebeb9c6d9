use crate::errors::{FlowError, Result};
use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use pwgf_gp::Kernel;
use rand_xoshiro::Xoshiro256Plus;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Induce points selected from a training pool
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct InduceData<F: Float> {
    /// Selected rows, in selection order
    pub x: Array2<F>,
    /// Targets of the selected rows when the pool had targets
    pub y: Option<Array1<F>>,
    /// Row indices of the selection in the pool
    pub indices: Vec<usize>,
}

impl<F: Float> InduceData<F> {
    /// Number of induce points
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    /// Whether no point is selected
    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }
}

/// A trait for strategies choosing induce points in a pool of inputs
pub trait InduceDataSelector<F: Float> {
    /// Select `number_of_induce_points` rows of `x` (and their targets when given),
    /// deterministically given `seed`
    fn select<K: Kernel<F>>(
        &self,
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: Option<&ArrayBase<impl Data<Elem = F>, Ix1>>,
        number_of_induce_points: usize,
        seed: u64,
    ) -> Result<InduceData<F>>;
}

/// Greedy selection of the point of maximal conditional variance
///
/// This is a pivoted Cholesky decomposition of the pool gram matrix: starting from the
/// prior variances `k(x_i, x_i)`, each step picks the remaining point with the largest
/// variance conditioned on the points already selected, then downdates every conditional
/// variance with the new pivot column. Ties go to the first point of a seed-shuffled order.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConditionalVarianceInduceDataSelector;

impl<F: Float> InduceDataSelector<F> for ConditionalVarianceInduceDataSelector {
    fn select<K: Kernel<F>>(
        &self,
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: Option<&ArrayBase<impl Data<Elem = F>, Ix1>>,
        number_of_induce_points: usize,
        seed: u64,
    ) -> Result<InduceData<F>> {
        if number_of_induce_points == 0 {
            return Err(FlowError::configuration(
                "Number of induce points should be positive",
            ));
        }
        let n = x.nrows();
        if let Some(y) = y {
            if y.len() != n {
                return Err(FlowError::configuration(format!(
                    "Expected {} targets, got {}",
                    n,
                    y.len()
                )));
            }
        }
        let indices = if number_of_induce_points >= n {
            (0..n).collect()
        } else {
            pivoted_cholesky(kernel, x, number_of_induce_points, seed)?
        };
        Ok(InduceData {
            x: x.select(Axis(0), &indices),
            y: y.map(|y| y.select(Axis(0), &indices)),
            indices,
        })
    }
}

fn pivoted_cholesky<F: Float, K: Kernel<F>>(
    kernel: &K,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    m: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    let n = x.nrows();
    let mut order = (0..n).collect::<Vec<_>>();
    order.shuffle(&mut Xoshiro256Plus::seed_from_u64(seed));

    let mut variances = kernel.diag(x);
    if variances.iter().any(|v| !v.is_finite()) {
        return Err(FlowError::numerical(
            "NaN or Inf detected in prior variances",
        ));
    }
    let mut factor = Array2::<F>::zeros((n, m));
    let mut selected = vec![false; n];
    let mut pivots = Vec::with_capacity(m);

    for j in 0..m {
        let mut pivot = None;
        for &i in order.iter().filter(|&&i| !selected[i]) {
            match pivot {
                Some(p) if variances[i] <= variances[p] => {}
                _ => pivot = Some(i),
            }
        }
        let p = pivot.ok_or_else(|| FlowError::numerical("No pivot left in induce pool"))?;
        selected[p] = true;
        pivots.push(p);

        let pivot_var = variances[p];
        if pivot_var <= F::epsilon() {
            // pool spanned already, the remaining picks only follow the tie order
            continue;
        }
        let pivot_row = x.row(p).insert_axis(Axis(0));
        let kcol = kernel.evaluate(x, &pivot_row).column(0).to_owned();
        let projected = if j == 0 {
            Array1::zeros(n)
        } else {
            let previous = factor.slice(s![.., ..j]);
            previous.dot(&previous.row(p))
        };
        let scale = pivot_var.sqrt();
        let column: Array1<F> = (&kcol - &projected).mapv(|v| v / scale);
        Zip::from(&mut variances)
            .and(&column)
            .for_each(|v, &c| *v = (*v - c * c).max(F::zero()));
        factor.column_mut(j).assign(&column);
    }
    Ok(pivots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};
    use pwgf_gp::{LinearKernel, RbfKernel};
    use std::collections::HashSet;

    fn pool() -> Array2<f64> {
        Array::linspace(-2., 2., 21).insert_axis(Axis(1))
    }

    fn select(m: usize, seed: u64) -> InduceData<f64> {
        let x = pool();
        let y = x.column(0).mapv(|v| v * v);
        ConditionalVarianceInduceDataSelector
            .select(
                &RbfKernel::from_params(1.0, array![0.5]).unwrap(),
                &x,
                Some(&y),
                m,
                seed,
            )
            .unwrap()
    }

    #[test]
    fn test_distinct_selection() {
        let x = pool();
        for m in [1, 5, 20] {
            let induce = select(m, 0);
            assert_eq!(induce.len(), m);
            let distinct = induce.indices.iter().collect::<HashSet<_>>();
            assert_eq!(distinct.len(), m);
            for (row, &i) in induce.x.outer_iter().zip(induce.indices.iter()) {
                assert_eq!(row, x.row(i));
            }
            let y = induce.y.unwrap();
            assert_eq!(y, induce.x.column(0).mapv(|v| v * v));
        }
    }

    #[test]
    fn test_full_pool() {
        let induce = select(21, 3);
        assert_eq!(induce.indices, (0..21).collect::<Vec<_>>());
        assert_eq!(induce.x, pool());
        let induce = select(50, 3);
        assert_eq!(induce.len(), 21);
    }

    #[test]
    fn test_determinism() {
        assert_eq!(select(7, 42), select(7, 42));
    }

    #[test]
    fn test_spread_out_selection() {
        // stationary kernel: every prior variance ties, the second pick is far from the first
        let induce = select(2, 11);
        let gap = (induce.x[[0, 0]] - induce.x[[1, 0]]).abs();
        assert!(gap > 1.0, "gap={}", gap);
    }

    #[test]
    fn test_linear_kernel_rank() {
        // 2-D linear kernel has rank 2: the third pick only follows the tie order
        let x = array![[1., 0.], [0., 2.], [1., 1.], [3., 0.]];
        let induce = ConditionalVarianceInduceDataSelector
            .select(&LinearKernel::default(), &x, None::<&Array1<f64>>, 3, 0)
            .unwrap();
        assert_eq!(&induce.indices[..2], &[3, 1]);
        assert!(induce.y.is_none());
    }

    #[test]
    fn test_zero_induce_points() {
        let x = pool();
        let res = ConditionalVarianceInduceDataSelector.select(
            &RbfKernel::new(1),
            &x,
            None::<&Array1<f64>>,
            0,
            0,
        );
        assert!(res.unwrap_err().is_configuration_error());
    }
}
