use std::path::Path;

use abc_smc::{
    storage::HistoryStore, AbcConfig, IntegratedModel, IntegratedOutcome, Model, Parameters, ProductPrior, Simulator,
    TrialContext, ABCErr, ABCResult, ABCSMC, RV,
};
use color_eyre::eyre;
use path_absolutize::Absolutize;
use rand::{distributions::Distribution, RngCore};
use statrs::distribution::Normal;

/// A random walk of 50 steps with unknown drift ends at the observed
/// position. The model accumulates the distance to the observed path as it
/// goes and abandons a simulation as soon as that exceeds epsilon.
///
/// With no distance function the initial epsilon cannot be calibrated, so
/// one is supplied when the config file leaves it out.
const STEPS: usize = 50;
const OBSERVED_DRIFT: f64 = 0.3;

struct DriftingWalk {
    noise: Normal,
}

impl IntegratedModel for DriftingWalk {
    fn integrated_simulate(
        &self,
        parameters: &Parameters,
        epsilon: f64,
        context: &TrialContext,
        rng: &mut dyn RngCore,
    ) -> ABCResult<IntegratedOutcome> {
        let drift = parameters["drift"];
        let mut position = 0.0;
        let mut distance = 0.0;
        for step in 0..STEPS {
            position += drift + self.noise.sample(rng);
            let target = context
                .observed
                .get(&format!("x{}", step))
                .ok_or_else(|| ABCErr::ModelError(format!("Observed data has no step {}", step)))?;
            distance += (position - target).abs() / STEPS as f64;
            if distance > epsilon {
                return Ok(IntegratedOutcome::Rejected);
            }
        }
        Ok(IntegratedOutcome::Accepted {
            distance,
            summary: None,
        })
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let path = Path::new("./config.toml").absolutize()?;
    log::info!("Load config from {:?}", path);
    let mut config = AbcConfig::from_path(path)?;
    if config.algorithm.initial_epsilon.is_none() && config.algorithm.epsilon_schedule.is_none() {
        config.algorithm.initial_epsilon = Some(5.0);
    }

    let model = Model::new(
        "drifting walk",
        ProductPrior::new([("drift", RV::uniform(-1.0, 1.0))])?,
        Simulator::integrated(DriftingWalk {
            noise: Normal::new(0.0, 0.1)?,
        }),
    );
    let mut abc = ABCSMC::from_config(&config, vec![model], None)?;

    let observed = (0..STEPS)
        .map(|step| (format!("x{}", step), OBSERVED_DRIFT * (step + 1) as f64))
        .collect();
    let run_id = abc.new_run(observed)?;
    let summary = abc.run()?;
    log::info!("{:#?}", summary);

    for gen in abc.store().generations(run_id)? {
        println!(
            "Generation {}: epsilon {:.4}, {} simulations, {} stopped early",
            gen.number, gen.epsilon, gen.nr_evaluations, gen.nr_early_stopped
        );
    }

    Ok(())
}
