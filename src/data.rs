use crate::errors::{ExperimentError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data as NdData, Ix1, Ix2};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use ndarray_stats::QuantileExt;
use pwgf_gp::utils::NormalizedData;
use rand_xoshiro::Xoshiro256Plus;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A named set of inputs with optional targets, immutable once built
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct Data<F: Float> {
    x: Array2<F>,
    y: Option<Array1<F>>,
    name: String,
}

impl<F: Float> Data<F> {
    /// Constructor, `y` having one target per row of `x` when given
    pub fn new(x: Array2<F>, y: Option<Array1<F>>, name: impl Into<String>) -> Result<Self> {
        if let Some(y) = &y {
            if y.len() != x.nrows() {
                return Err(ExperimentError::InvalidValue(format!(
                    "Expected {} targets, got {}",
                    x.nrows(),
                    y.len()
                )));
            }
        }
        Ok(Data {
            x,
            y,
            name: name.into(),
        })
    }

    /// Inputs
    pub fn x(&self) -> &Array2<F> {
        &self.x
    }

    /// Targets
    pub fn y(&self) -> Option<&Array1<F>> {
        self.y.as_ref()
    }

    /// Targets, an error when absent
    pub fn targets(&self) -> Result<&Array1<F>> {
        self.y.as_ref().ok_or_else(|| {
            ExperimentError::InvalidValue(format!("Data '{}' has no targets", self.name))
        })
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    /// Whether there is no point
    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    /// Rows at `indices` as a new named data set
    pub fn select(&self, indices: &[usize], name: impl Into<String>) -> Data<F> {
        Data {
            x: self.x.select(Axis(0), indices),
            y: self.y.as_ref().map(|y| y.select(Axis(0), indices)),
            name: name.into(),
        }
    }
}

/// The splits of one experiment together with the target normalisation statistics
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct ExperimentData<F: Float> {
    /// Experiment name
    pub name: String,
    /// Whole data set
    pub full: Data<F>,
    /// Training split
    pub train: Data<F>,
    /// Test split
    pub test: Data<F>,
    /// Validation split
    pub validation: Data<F>,
    /// Mean of the raw training targets
    pub y_mean: F,
    /// Standard deviation of the raw training targets, metrics are scaled back with it
    pub y_std: F,
}

/// Mean and standard deviation (ddof 1), a zero deviation being replaced by one
fn target_statistics<F: Float>(y: &ArrayBase<impl NdData<Elem = F>, Ix1>) -> Result<(F, F)> {
    let mean = y.mean().ok_or_else(|| {
        ExperimentError::InvalidValue("Cannot normalise empty targets".to_string())
    })?;
    let ddof = if y.len() > 1 { F::one() } else { F::zero() };
    let std = y.std(ddof);
    Ok((mean, if std > F::zero() { std } else { F::one() }))
}

fn check_percentage<F: Float>(name: &str, value: F) -> Result<()> {
    if !(value >= F::zero() && value <= F::one()) {
        return Err(ExperimentError::InvalidValue(format!(
            "{} percentage should be in [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Random train/validation/test split of `(x, y)`
///
/// Rows are shuffled with `seed` then cut in `floor(p n)` training and validation points, the
/// test split taking the rest. When `normalise` is set, inputs and targets of every split are
/// standardized with the training statistics.
#[allow(clippy::too_many_arguments)]
pub fn set_up_experiment<F: Float>(
    name: &str,
    seed: u64,
    x: &ArrayBase<impl NdData<Elem = F>, Ix2>,
    y: &ArrayBase<impl NdData<Elem = F>, Ix1>,
    train_data_percentage: F,
    validation_data_percentage: F,
    test_data_percentage: F,
    normalise: bool,
) -> Result<ExperimentData<F>> {
    check_percentage("Train", train_data_percentage)?;
    check_percentage("Validation", validation_data_percentage)?;
    check_percentage("Test", test_data_percentage)?;
    let total = train_data_percentage + validation_data_percentage + test_data_percentage;
    if num_traits::Float::abs(total - F::one()) > F::cast(1e-8) {
        return Err(ExperimentError::InvalidValue(format!(
            "Split percentages should sum to 1, got {}",
            total
        )));
    }
    let n = x.nrows();
    let n_train = (train_data_percentage * F::cast(n)).floor().to_usize().unwrap_or(0);
    let n_validation = (validation_data_percentage * F::cast(n))
        .floor()
        .to_usize()
        .unwrap_or(0)
        .min(n - n_train.min(n));
    if n_train == 0 {
        return Err(ExperimentError::InvalidValue(format!(
            "No training point left out of {} points",
            n
        )));
    }

    let mut indices = (0..n).collect::<Vec<_>>();
    indices.shuffle(&mut Xoshiro256Plus::seed_from_u64(seed));
    let (train_idx, rest) = indices.split_at(n_train);
    let (validation_idx, test_idx) = rest.split_at(n_validation);

    let full = Data::new(x.to_owned(), Some(y.to_owned()), "full")?;
    let experiment = ExperimentData {
        name: name.to_string(),
        train: full.select(train_idx, "train"),
        validation: full.select(validation_idx, "validation"),
        test: full.select(test_idx, "test"),
        full,
        y_mean: F::zero(),
        y_std: F::one(),
    };
    if normalise {
        experiment.normalised()
    } else {
        Ok(experiment)
    }
}

/// Split 1-D data in intervals, some of them held out as test data
///
/// The range of the first input column is cut in `total_number_of_intervals` intervals of equal
/// width. `number_of_test_intervals` of them, drawn with `split_seed`, form the test split. The
/// remaining points are shuffled with `seed` and the first `floor(train_data_percentage n)`
/// become training points, the others validation points.
#[allow(clippy::too_many_arguments)]
pub fn split_regression_data_intervals<F: Float>(
    name: &str,
    seed: u64,
    split_seed: u64,
    x: &ArrayBase<impl NdData<Elem = F>, Ix2>,
    y: &ArrayBase<impl NdData<Elem = F>, Ix1>,
    number_of_test_intervals: usize,
    total_number_of_intervals: usize,
    train_data_percentage: F,
) -> Result<ExperimentData<F>> {
    check_percentage("Train", train_data_percentage)?;
    if total_number_of_intervals == 0 || number_of_test_intervals >= total_number_of_intervals {
        return Err(ExperimentError::InvalidValue(format!(
            "Expected fewer test intervals than intervals, got {} out of {}",
            number_of_test_intervals, total_number_of_intervals
        )));
    }
    if x.ncols() == 0 {
        return Err(ExperimentError::InvalidValue(
            "Interval split needs at least one input column".to_string(),
        ));
    }
    let column = x.column(0);
    let lower = *column
        .min()
        .map_err(|e| ExperimentError::InvalidValue(format!("Cannot split data: {}", e)))?;
    let upper = *column
        .max()
        .map_err(|e| ExperimentError::InvalidValue(format!("Cannot split data: {}", e)))?;
    let width = (upper - lower) / F::cast(total_number_of_intervals);
    let last = total_number_of_intervals - 1;
    let interval_of = |v: F| -> usize {
        if width > F::zero() {
            ((v - lower) / width).floor().to_usize().unwrap_or(0).min(last)
        } else {
            0
        }
    };

    let mut intervals = (0..total_number_of_intervals).collect::<Vec<_>>();
    intervals.shuffle(&mut Xoshiro256Plus::seed_from_u64(split_seed));
    let test_intervals = &intervals[..number_of_test_intervals];

    let (test_idx, mut rest): (Vec<usize>, Vec<usize>) =
        (0..x.nrows()).partition(|&i| test_intervals.contains(&interval_of(column[i])));
    rest.shuffle(&mut Xoshiro256Plus::seed_from_u64(seed));
    let n_train = (train_data_percentage * F::cast(rest.len()))
        .floor()
        .to_usize()
        .unwrap_or(0);
    let (train_idx, validation_idx) = rest.split_at(n_train);

    let full = Data::new(x.to_owned(), Some(y.to_owned()), "full")?;
    Ok(ExperimentData {
        name: name.to_string(),
        train: full.select(train_idx, "train"),
        validation: full.select(validation_idx, "validation"),
        test: full.select(&test_idx, "test"),
        full,
        y_mean: F::zero(),
        y_std: F::one(),
    })
}

impl<F: Float> ExperimentData<F> {
    /// Every split standardized with the training statistics
    pub fn normalised(self) -> Result<Self> {
        let x_stats = NormalizedData::new(self.train.x())?;
        let (y_mean, y_std) = target_statistics(self.train.targets()?)?;
        let scale = |data: &Data<F>| -> Data<F> {
            Data {
                x: x_stats.transform(data.x()),
                y: data.y().map(|y| y.mapv(|v| (v - y_mean) / y_std)),
                name: data.name().to_string(),
            }
        };
        Ok(ExperimentData {
            full: scale(&self.full),
            train: scale(&self.train),
            test: scale(&self.test),
            validation: scale(&self.validation),
            name: self.name,
            y_mean,
            y_std,
        })
    }

    /// Number of input dimensions
    pub fn dim(&self) -> usize {
        self.full.x().ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use std::collections::HashSet;

    fn dataset() -> (Array2<f64>, Array1<f64>) {
        let x = Array::linspace(-2., 2., 40).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| 3. * v + 1.);
        (x, y)
    }

    #[test]
    fn test_data_shape_mismatch() {
        let res = Data::new(array![[1.], [2.]], Some(array![1.]), "bad");
        assert!(matches!(res, Err(ExperimentError::InvalidValue(_))));
        let data = Data::new(array![[1.], [2.]], None, "inputs").unwrap();
        assert!(data.targets().is_err());
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_random_split() {
        let (x, y) = dataset();
        let exp = set_up_experiment("line", 3, &x, &y, 0.5, 0.25, 0.25, false).unwrap();
        assert_eq!(exp.train.len(), 20);
        assert_eq!(exp.validation.len(), 10);
        assert_eq!(exp.test.len(), 10);
        let all = exp
            .train
            .x()
            .iter()
            .chain(exp.validation.x().iter())
            .chain(exp.test.x().iter())
            .map(|v| (v * 1e6).round() as i64)
            .collect::<HashSet<_>>();
        assert_eq!(all.len(), 40);
        assert_eq!(exp.y_std, 1.);

        let again = set_up_experiment("line", 3, &x, &y, 0.5, 0.25, 0.25, false).unwrap();
        assert_eq!(again.test, exp.test);
    }

    #[test]
    fn test_normalised_split() {
        let (x, y) = dataset();
        let exp = set_up_experiment("line", 0, &x, &y, 0.6, 0.2, 0.2, true).unwrap();
        let y_train = exp.train.targets().unwrap();
        assert_abs_diff_eq!(y_train.mean().unwrap(), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(y_train.std(1.), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(exp.train.x().mean().unwrap(), 0., epsilon = 1e-12);
        // linear targets remain linear in normalised inputs
        let raw = exp.test.targets().unwrap().mapv(|v| v * exp.y_std + exp.y_mean);
        assert!(raw.iter().all(|v| (-5.001..=7.001).contains(v)));
    }

    #[test]
    fn test_bad_percentages() {
        let (x, y) = dataset();
        assert!(set_up_experiment("line", 0, &x, &y, 0.5, 0.5, 0.5, false).is_err());
        assert!(set_up_experiment("line", 0, &x, &y, 0., 0.5, 0.5, false).is_err());
    }

    #[test]
    fn test_interval_split() {
        let (x, y) = dataset();
        let exp = split_regression_data_intervals("line", 0, 7, &x, &y, 2, 8, 0.75).unwrap();
        assert_eq!(exp.test.len(), 10);
        assert_eq!(exp.train.len() + exp.validation.len(), 30);
        assert_eq!(exp.train.len(), 22);

        // test points are gathered in two contiguous intervals of width 0.5
        let width = 0.5;
        let intervals = exp
            .test
            .x()
            .column(0)
            .iter()
            .map(|&v| (((v + 2.) / width).floor() as usize).min(7))
            .collect::<HashSet<_>>();
        assert_eq!(intervals.len(), 2);
        for v in exp.train.x().column(0).iter() {
            assert!(!intervals.contains(&(((v + 2.) / width).floor() as usize).min(7)));
        }
    }

    #[test]
    fn test_interval_split_errors() {
        let (x, y) = dataset();
        assert!(split_regression_data_intervals("line", 0, 0, &x, &y, 4, 4, 0.5).is_err());
        assert!(split_regression_data_intervals("line", 0, 0, &x, &y, 1, 0, 0.5).is_err());
    }
}
