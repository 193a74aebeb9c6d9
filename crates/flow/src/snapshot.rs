use crate::algorithm::ProjectedWassersteinGradientFlow;
use crate::errors::{FlowError, Result};
use crate::kernel::GradientFlowKernel;
use linfa::Float;
use ndarray::{Array1, Array2};
use pwgf_gp::Kernel;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "persistent")]
use std::fs;
#[cfg(feature = "persistent")]
use std::io::Write;

/// Format version written by [`ProjectedWassersteinGradientFlow::snapshot`]
pub const SNAPSHOT_VERSION: u32 = 1;

/// Versioned state from which a flow is fully rebuilt
///
/// Training data and approximation samples are not part of the snapshot, they are given
/// back to [`ProjectedWassersteinGradientFlow::from_snapshot`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct FlowSnapshot<F: Float> {
    /// Format version
    pub version: u32,
    /// (number of induce points, number of particles) matrix
    pub particles: Array2<F>,
    /// Observation noise variance
    pub observation_noise: F,
    /// Jitter added to the induce gram matrix
    pub jitter: F,
    /// Jitter of the Nyström factorization
    pub approximation_jitter: F,
    /// Log-space base kernel hyperparameters
    pub kernel_hyperparameters: Array1<F>,
    /// Induce points
    pub x_induce: Array2<F>,
}

impl<F: Float, K: Kernel<F>> ProjectedWassersteinGradientFlow<F, K> {
    /// Current state as a versioned snapshot
    pub fn snapshot(&self) -> FlowSnapshot<F> {
        FlowSnapshot {
            version: SNAPSHOT_VERSION,
            particles: self.particles().to_owned(),
            observation_noise: pwgf_gp::GpModel::observation_noise(self),
            jitter: self.jitter(),
            approximation_jitter: self.flow_kernel().jitter(),
            kernel_hyperparameters: self.flow_kernel().hyperparameters(),
            x_induce: self.x_induce().to_owned(),
        }
    }

    /// Rebuild a flow from a snapshot, `base_kernel` receiving the saved hyperparameters
    pub fn from_snapshot(
        snapshot: FlowSnapshot<F>,
        mut base_kernel: K,
        approximation_samples: Array2<F>,
        x_train: Array2<F>,
        y_train: Array1<F>,
    ) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(FlowError::SnapshotVersionError {
                expected: SNAPSHOT_VERSION,
                actual: snapshot.version,
            });
        }
        base_kernel.set_hyperparameters(&snapshot.kernel_hyperparameters)?;
        let kernel = GradientFlowKernel::new(base_kernel, approximation_samples)?
            .with_jitter(snapshot.approximation_jitter)?;
        ProjectedWassersteinGradientFlow::with_particles(
            snapshot.particles,
            kernel,
            snapshot.x_induce,
            x_train,
            y_train,
            snapshot.jitter,
            snapshot.observation_noise,
        )
    }
}

#[cfg(feature = "persistent")]
impl<F: Float + Serialize + serde::de::DeserializeOwned> FlowSnapshot<F> {
    /// Save snapshot in given file as json.
    pub fn save(&self, path: &str) -> Result<()> {
        let mut file = fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load snapshot from given json file.
    pub fn load(path: &str) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s, Array, Axis};
    use pwgf_gp::optimization::learning_rate_grid;
    use pwgf_gp::{GpModel, RbfKernel};

    fn trained_flow() -> (
        ProjectedWassersteinGradientFlow<f64, RbfKernel<f64>>,
        Array2<f64>,
        Array1<f64>,
    ) {
        let x = Array::linspace(-2., 2., 16).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| v.cos());
        let base = RbfKernel::from_params(1.2, array![0.7]).unwrap();
        let kernel = GradientFlowKernel::new(base, x.clone())
            .unwrap()
            .with_jitter(1e-5)
            .unwrap();
        let x_induce = x.slice(s![..;3, ..]).to_owned();
        let mut flow = ProjectedWassersteinGradientFlow::new(
            12,
            kernel,
            x_induce,
            x.clone(),
            y.clone(),
            1e-6,
            0.2,
            9,
        )
        .unwrap();
        let rates = learning_rate_grid(1e-4, 1e-1, 4).unwrap();
        flow.optimise(3, &rates, 1e6, &x, &y).unwrap();
        (flow, x, y)
    }

    #[test]
    fn test_restore_from_snapshot() {
        let (flow, x, y) = trained_flow();
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_abs_diff_eq!(snapshot.approximation_jitter, 1e-5);

        let restored = ProjectedWassersteinGradientFlow::from_snapshot(
            snapshot,
            RbfKernel::new(1),
            x.clone(),
            x.clone(),
            y,
        )
        .unwrap();
        let xtest = array![[-1.3], [0.1], [1.9]];
        let (expected, actual) = (flow.predict(&xtest).unwrap(), restored.predict(&xtest).unwrap());
        assert_abs_diff_eq!(actual.mean(), expected.mean(), epsilon = 1e-10);
        assert_abs_diff_eq!(actual.covariance(), expected.covariance(), epsilon = 1e-10);
        assert_eq!(restored.particles(), flow.particles());
    }

    #[test]
    fn test_version_mismatch() {
        let (flow, x, y) = trained_flow();
        let mut snapshot = flow.snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        let res = ProjectedWassersteinGradientFlow::from_snapshot(
            snapshot,
            RbfKernel::new(1),
            x.clone(),
            x,
            y,
        );
        let err = res.unwrap_err();
        assert!(err.is_configuration_error());
        assert!(matches!(err, FlowError::SnapshotVersionError { actual: 2, .. }));
    }

    #[test]
    fn test_snapshot_particles_mismatch() {
        let (flow, x, y) = trained_flow();
        let mut snapshot = flow.snapshot();
        snapshot.particles = Array2::zeros((2, 12));
        let res =
            ProjectedWassersteinGradientFlow::from_snapshot(snapshot, RbfKernel::new(1), x.clone(), x, y);
        assert!(matches!(res, Err(FlowError::ParticleShapeError { .. })));
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_save_load_snapshot() {
        let (flow, _, _) = trained_flow();
        let snapshot = flow.snapshot();
        let path = std::env::temp_dir().join("pwgf_flow_snapshot.json");
        let path = path.to_str().unwrap();
        snapshot.save(path).expect("snapshot saved");
        let loaded = FlowSnapshot::<f64>::load(path).expect("snapshot loaded");
        assert_eq!(loaded.version, snapshot.version);
        assert_abs_diff_eq!(loaded.particles, snapshot.particles, epsilon = 1e-12);
        assert_abs_diff_eq!(loaded.x_induce, snapshot.x_induce, epsilon = 1e-12);
        assert_abs_diff_eq!(
            loaded.kernel_hyperparameters,
            snapshot.kernel_hyperparameters,
            epsilon = 1e-12
        );
    }
}
