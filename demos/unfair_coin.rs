use std::path::Path;

use abc_smc::{
    storage::HistoryStore,
    AbcConfig, Model, PNormDistance, Parameters, ProductPrior, Simulator, SummaryStatistics, TrialContext, ABCResult,
    ABCSMC, RV,
};
use color_eyre::eyre;
use path_absolutize::Absolutize;
use rand::{Rng, RngCore};

/// A coin is tossed 100 times and lands heads 70 times. With a uniform
/// prior on P(heads), what is its posterior?
///
/// ```
/// export RUST_LOG=error,abc_smc=info
/// cargo run --release --example unfair_coin
/// ```
const NUM_TOSSES: u32 = 100;

fn toss(parameters: &Parameters, _: &TrialContext, rng: &mut dyn RngCore) -> ABCResult<SummaryStatistics> {
    let heads = parameters["heads"];
    let count = (0..NUM_TOSSES).filter(|_| rng.gen_bool(heads)).count();
    Ok([("proportion".to_string(), count as f64 / f64::from(NUM_TOSSES))]
        .into_iter()
        .collect())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let path = Path::new("./config.toml").absolutize()?;
    log::info!("Load config from {:?}", path);
    let config = AbcConfig::from_path(path)?;

    let model = Model::new(
        "unfair coin",
        ProductPrior::new([("heads", RV::uniform(0.0, 1.0))])?,
        Simulator::two_stage(toss),
    );
    let mut abc = ABCSMC::from_config(&config, vec![model], Some(Box::new(PNormDistance::new(1.0)?)))?;

    let observed = [("proportion".to_string(), 0.7)].into_iter().collect();
    abc.new_run(observed)?;
    let summary = abc.run()?;
    log::info!("{:#?}", summary);

    let store = abc.store();
    if let Some((t, population)) = store.load_last_population(summary.run_id, 0)? {
        let (parameters, weights) = population.weighted_parameters();
        let mean: f64 = parameters.iter().zip(&weights).map(|(p, w)| p["heads"] * w).sum();
        println!("Generation {}: posterior mean P(heads) = {:.3}", t, mean);
    }

    Ok(())
}
