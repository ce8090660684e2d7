use std::path::Path;

use abc_smc::{
    storage::HistoryStore, AbcConfig, Model, PNormDistance, Parameters, ProductPrior, Simulator, SummaryStatistics,
    TrialContext, ABCResult, ABCSMC, RV,
};
use color_eyre::eyre;
use path_absolutize::Absolutize;
use rand::{Rng, RngCore};

/// Is a coin that landed heads 62 times in 100 tosses close to fair, or
/// could it be anything? Both candidates toss the same way but the "nearly
/// fair" model only allows P(heads) within 0.05 of a half. The posterior
/// model probabilities answer the question.
const NUM_TOSSES: u32 = 100;

fn toss(parameters: &Parameters, _: &TrialContext, rng: &mut dyn RngCore) -> ABCResult<SummaryStatistics> {
    let heads = parameters["heads"];
    let count = (0..NUM_TOSSES).filter(|_| rng.gen_bool(heads)).count();
    Ok([("heads".to_string(), count as f64)].into_iter().collect())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let path = Path::new("./config.toml").absolutize()?;
    log::info!("Load config from {:?}", path);
    let config = AbcConfig::from_path(path)?;

    let models = vec![
        Model::new(
            "nearly fair",
            ProductPrior::new([("heads", RV::uniform(0.45, 0.55))])?,
            Simulator::two_stage(toss),
        ),
        Model::new(
            "anything goes",
            ProductPrior::new([("heads", RV::uniform(0.0, 1.0))])?,
            Simulator::two_stage(toss),
        ),
    ];
    let mut abc = ABCSMC::from_config(&config, models, Some(Box::new(PNormDistance::new(1.0)?)))?;

    let run_id = abc.new_run([("heads".to_string(), 62.0)].into_iter().collect())?;
    let summary = abc.run()?;
    log::info!("{:#?}", summary);

    let store = abc.store();
    for gen in store.generations(run_id)? {
        println!(
            "Generation {}: epsilon {:.2}, model probabilities {:?}",
            gen.number,
            gen.epsilon,
            store.get_model_probabilities(run_id, gen.number)?
        );
    }

    Ok(())
}
