use std::path::PathBuf;

use abc_smc::{
    storage::{FileSystemStore, HistoryStore, RunId},
    ABCErr, ABCResult,
};
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct AbcHistory {
    /// Directory holding the run folders
    #[clap(short, long)]
    base_path: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored runs with their models and generation counts
    Runs,
    /// Epsilon, simulation count and model probabilities per generation
    Epsilons {
        #[clap(short, long)]
        run: String,
    },
    /// Weighted parameters of one model in one generation (default: latest)
    Distribution {
        #[clap(short, long)]
        run: String,
        #[clap(short, long, default_value = "0")]
        model: usize,
        #[clap(short, long)]
        generation: Option<u16>,
    },
}

/// Inspect the history written by a file system store.
///
/// ```
/// export RUST_LOG=error,abc_smc=info
/// cargo run --release --bin abc_history -- --base-path out/ epsilons --run $RUN_ID
/// ```
fn main() -> ABCResult<()> {
    env_logger::init();

    let args = AbcHistory::parse();
    log::debug!("{:#?}", args);
    let store = FileSystemStore::new(&args.base_path)?;

    let output = match args.command {
        Command::Runs => {
            let runs = store
                .list_runs()?
                .into_iter()
                .map(|id| -> ABCResult<serde_json::Value> {
                    let info = store.load_run(id)?;
                    Ok(json!({
                        "id": id.to_string(),
                        "created_unix_secs": info.created_unix_secs,
                        "models": info.model_names,
                        "generations": store.max_t(id)?.map(|t| u32::from(t) + 1).unwrap_or(0),
                    }))
                })
                .collect::<ABCResult<Vec<_>>>()?;
            json!(runs)
        }
        Command::Epsilons { run } => {
            let run = parse_run(&run)?;
            let generations = store
                .generations(run)?
                .iter()
                .map(|g| {
                    let nr_models = g.populations.keys().max().map(|m| m + 1).unwrap_or(0);
                    json!({
                        "t": g.number,
                        "epsilon": g.epsilon.to_string(),
                        "nr_evaluations": g.nr_evaluations,
                        "acceptance_rate": g.acceptance_rate(),
                        "model_probabilities": g.model_probabilities(nr_models),
                    })
                })
                .collect::<Vec<_>>();
            json!(generations)
        }
        Command::Distribution { run, model, generation } => {
            let run = parse_run(&run)?;
            let t = match generation {
                Some(t) => t,
                None => store
                    .max_t(run)?
                    .ok_or_else(|| ABCErr::StorageError(format!("Run {} has no generations", run)))?,
            };
            let (parameters, weights) = store.get_distribution(run, model, t)?;
            let particles = parameters
                .iter()
                .zip(weights)
                .map(|(p, w)| json!({ "parameters": p, "weight": w }))
                .collect::<Vec<_>>();
            json!({ "t": t, "model": model, "particles": particles })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_run(run: &str) -> ABCResult<RunId> {
    Ok(RunId::parse_str(run)?)
}
