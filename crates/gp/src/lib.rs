//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! models used as baselines and building blocks of projected Wasserstein gradient flows.
//!
//! Exact GP regression is implemented by [ExactGp] parameterized by [ExactGpParams]: kernel
//! hyperparameters, noise variance and constant mean are learned by maximizing the exact marginal
//! likelihood with Adam.
//!
//! Sparse variational GP regression (svGP) addresses the O(N^3) processing time and O(N^2) memory
//! of exact GPs where N is the number of training points. It is implemented by [SparseVariationalGp]
//! parameterized by [SvgpParams], complexity being reduced to O(N.M^2) where M is the number of
//! so-called inducing points with M < N.
//!
//! Every model exposes its latent and predictive [MultivariateNormal] distributions through the
//! [GpModel] trait, the capability needed for calibration and [metrics].
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod distribution;
mod errors;
pub mod kernels;
mod likelihood;
pub mod metrics;
mod model;
mod sparse_algorithm;

mod parameters;
mod sparse_parameters;
pub mod utils;

pub mod optimization;

pub use algorithm::*;
pub use distribution::*;
pub use errors::*;
pub use kernels::{Kernel, LinearKernel, RbfKernel};
pub use likelihood::*;
pub use model::*;
pub use parameters::*;
pub use sparse_algorithm::*;
pub use sparse_parameters::*;
