//! This library implements approximate Gaussian Process regression with projected
//! Wasserstein gradient flows (PWGF).
//!
//! The posterior over the latent function is represented by an ensemble of particles, each
//! particle being a function evaluated at a small set of induce points. Particles move
//! along a kernelized Wasserstein gradient flow of the negative log posterior, approximated
//! in the feature space of a low-rank [GradientFlowKernel]. The empirical distribution of the
//! particles gives the predictive distribution through the [GpModel](pwgf_gp::GpModel) trait.
//!
//! * [ConditionalVarianceInduceDataSelector] chooses induce points in a training pool,
//! * [ProjectedWassersteinGradientFlow] parameterized by [PwgfParams] runs the flow with a
//!   learning rate line search at every epoch and an observation noise search,
//! * [TemperGp] calibrates the predictive variance of any model on held-out data.
//!
//! # Example
//!
//! ```no_run
//! use linfa::prelude::*;
//! use ndarray::{Array, Axis};
//! use pwgf_flow::{
//!     ConditionalVarianceInduceDataSelector, GradientFlowKernel, InduceDataSelector,
//!     ProjectedWassersteinGradientFlow,
//! };
//! use pwgf_gp::{GpModel, RbfKernel};
//!
//! let x = Array::linspace(-3., 3., 60).insert_axis(Axis(1));
//! let y = x.column(0).mapv(f64::sin);
//!
//! let base = RbfKernel::new(1);
//! let induce = ConditionalVarianceInduceDataSelector
//!     .select(&base, &x, Some(&y), 10, 0)
//!     .expect("induce points selected");
//! let kernel = GradientFlowKernel::new(base, induce.x.clone()).expect("kernel factorized");
//!
//! let flow = ProjectedWassersteinGradientFlow::params(kernel, induce.x)
//!     .number_of_particles(50)
//!     .observation_noise(0.01)
//!     .number_of_epochs(20)
//!     .fit(&Dataset::new(x.clone(), y))
//!     .expect("flow trained");
//! let pred = flow.predict(&x).expect("prediction");
//! println!("mean = {}", pred.mean());
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod errors;
mod induce;
mod kernel;
mod parameters;
mod snapshot;
mod temper;

pub use algorithm::*;
pub use errors::*;
pub use induce::*;
pub use kernel::*;
pub use parameters::*;
pub use snapshot::*;
pub use temper::*;
