//! Command-line harness: gene tree JSON in, posterior beliefs JSON out.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use interactree::{io, Analysis, Error, TransitionModel};

/// Infer posterior interaction probabilities from a reconciled gene tree.
#[derive(Debug, Parser)]
#[command(name = "interactree", version, about)]
struct Args {
    /// Gene tree JSON file (nodes and branches).
    tree: PathBuf,

    /// JSON map from interaction key to [1, 0] (absent) or [0, 1] (present).
    #[arg(short, long)]
    observations: Option<PathBuf>,

    /// Gain rate of the interaction transition model.
    #[arg(long, default_value_t = 0.2)]
    gain: f64,

    /// Loss rate of the interaction transition model.
    #[arg(long, default_value_t = 1.0)]
    loss: f64,

    /// Prior probability that the ancestral self-interaction exists.
    #[arg(long, default_value_t = 0.5)]
    prior: f64,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(beliefs) => {
            println!("{beliefs}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("interactree: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(args: &Args) -> Result<String> {
    let tree_file = File::open(&args.tree)
        .with_context(|| format!("opening gene tree {}", args.tree.display()))?;
    let tree = io::gene_tree_from_json(tree_file)?;

    let observations = match &args.observations {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening observations {}", path.display()))?;
            io::observations_from_json(file)?
        }
        None => BTreeMap::new(),
    };

    let model = TransitionModel::new(args.gain, args.loss);
    let prior = [1.0 - args.prior, args.prior];
    let mut analysis = Analysis::with_model(&tree, model, prior)?;
    let beliefs = analysis.analyse(&observations)?;

    serde_json::to_string_pretty(&beliefs).context("serialising beliefs")
}

/// 2 for invalid input, 3 for inference failures.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(
            Error::NotAPolytree
            | Error::InvariantViolated { .. }
            | Error::InconsistentEvidence(_)
            | Error::ConstructionFailure(_),
        ) => 3,
        Some(Error::InvalidGeneTree(_) | Error::InvalidObservation { .. }) | None => 2,
    }
}
