use std::path::Path;

use abc_smc::{
    kernel::OLCMTransition, storage::HistoryStore, AbcConfig, Model, PNormDistance, Parameters, ProductPrior, Simulator,
    SummaryStatistics, TrialContext, ABCResult, ABCSMC, RV,
};
use color_eyre::eyre;
use path_absolutize::Absolutize;
use rand::{Rng, RngCore};

/// We have two coins, A & B, neither of which need be fair.
/// Let P(Heads_A)=alpha and P(Heads_B)=beta.
///
/// Our experiment involves tossing both coins and applying an
/// OR to the results, so that the overall result is positive
/// if either coin is heads.
///
/// We toss the pair 100 times and count 75 positive results.
/// Given uniform priors on alpha and beta, what is their
/// (two dimensional) posterior distribution?
///
/// The kernel from the config file is replaced with an OLCM kernel.
const NUM_TRIALS: u32 = 100;
const OBSERVED_COUNT: f64 = 75.0;

fn toss_pair(parameters: &Parameters, _: &TrialContext, rng: &mut dyn RngCore) -> ABCResult<SummaryStatistics> {
    let (alpha, beta) = (parameters["alpha"], parameters["beta"]);
    let count = (0..NUM_TRIALS)
        .filter(|_| rng.gen_bool(alpha) || rng.gen_bool(beta))
        .count();
    Ok([("positives".to_string(), count as f64)].into_iter().collect())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let path = Path::new("./config.toml").absolutize()?;
    log::info!("Load config from {:?}", path);
    let config = AbcConfig::from_path(path)?;

    let model = Model::new(
        "or coins",
        ProductPrior::new([("alpha", RV::uniform(0.0, 1.0)), ("beta", RV::uniform(0.0, 1.0))])?,
        Simulator::two_stage(toss_pair),
    );
    let mut abc = ABCSMC::from_config(&config, vec![model], Some(Box::new(PNormDistance::new(1.0)?)))?
        .with_transition(Box::new(OLCMTransition::new(config.algorithm.min_bandwidth)));

    let observed = [("positives".to_string(), OBSERVED_COUNT)].into_iter().collect();
    let run_id = abc.new_run(observed)?;
    let summary = abc.run()?;
    log::info!("{:#?}", summary);

    let store = abc.store();
    println!("Epsilons: {:?}", store.get_all_epsilons(run_id)?);
    if let Some((t, population)) = store.load_last_population(run_id, 0)? {
        let (parameters, weights) = population.weighted_parameters();
        let (mut alpha, mut beta) = (0.0, 0.0);
        for (p, w) in parameters.iter().zip(&weights) {
            alpha += p["alpha"] * w;
            beta += p["beta"] * w;
        }
        println!("Generation {}: posterior mean alpha = {:.3}, beta = {:.3}", t, alpha, beta);
    }

    Ok(())
}
