use env_logger::{Builder, Env};
use pwgf::config::ExperimentConfig;
use pwgf::curves::Curve;
use pwgf::runners::run_curves_experiment;

fn main() -> anyhow::Result<()> {
    let env = Env::new().filter_or("PWGF_LOG", "info");
    Builder::from_env(env)
        .target(env_logger::Target::Stdout)
        .init();

    let config = ExperimentConfig::default();
    let mut rows = Vec::new();
    for curve in Curve::ALL {
        rows.extend(run_curves_experiment(curve, &config)?);
    }
    for row in rows.iter() {
        println!("{}", row);
    }
    Ok(())
}
