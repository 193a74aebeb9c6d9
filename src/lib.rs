//! Benchmark pipeline of approximate Gaussian Process regression with projected Wasserstein
//! gradient flows.
//!
//! An experiment goes through the following stages, each one available on its own in [runners]:
//!
//! 1. data generation and split ([curves], [data]),
//! 2. kernel learning with exact GPs fitted on training subsamples,
//! 3. induce points selection by conditional variance,
//! 4. gradient flow training followed by an observation noise search,
//! 5. svGP baselines training,
//! 6. variance calibration by temperature scaling on the validation split,
//! 7. predictive metrics in original target units.
//!
//! Models live in the `pwgf-gp` (exact GP, svGP, metrics) and `pwgf-flow` (gradient flow,
//! induce points selection, tempering) crates.
//!
//! # Example
//!
//! ```no_run
//! use pwgf::config::ExperimentConfig;
//! use pwgf::curves::Curve;
//! use pwgf::runners::run_curves_experiment;
//!
//! let rows = run_curves_experiment(Curve::Sine, &ExperimentConfig::default())
//!     .expect("experiment run");
//! for row in rows {
//!     println!("{}", row);
//! }
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
pub mod config;
pub mod curves;
pub mod data;
mod errors;
pub mod runners;

pub use errors::*;
