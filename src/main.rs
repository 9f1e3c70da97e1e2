use std::io::IsTerminal;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use ferrite_loss::{LossCase, LossResult};

/// Evaluate the masked Euclidean loss layer on JSON cases or random data.
#[derive(Parser)]
#[command(name = "ferrite-loss", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run setup, forward and backward on a case file and print the report.
    Eval {
        /// Path to a JSON case (spec, prediction, target, optional mask).
        case: String,
    },
    /// Run the layer on random [batch, dim] inputs.
    Demo {
        #[arg(long, default_value_t = 4)]
        batch: usize,
        #[arg(long, default_value_t = 8)]
        dim: usize,
        /// Fraction of elements marked invalid; 0 disables the mask.
        #[arg(long, default_value_t = 0.25)]
        mask_ratio: f64,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn run(cli: Cli) -> LossResult<()> {
    let case = match cli.command {
        Command::Eval { case } => LossCase::load_json(&case)?,
        Command::Demo { batch, dim, mask_ratio, seed } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            LossCase::random(batch, dim, mask_ratio, &mut rng)?
        }
    };

    let report = case.run()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
