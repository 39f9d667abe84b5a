use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;

use rustcar::export::{self, CsvSnapshots};
use rustcar::{CarRental, RentalConfig, State};

/// Command line argument parser.
#[derive(Parser, Debug)]
#[command(about = "Solve the Barto and Sutton Car Rental Problem", long_about = None)]
pub struct Args {
    /// Path to RustCar configuration TOML file. Defaults are used if omitted.
    config_path: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print expected rewards and transition probabilities for both sites.
    Probs,
    /// Calculate expected reward for a state.
    Reward { n1: u8, n2: u8 },
    /// Move cars overnight and show the morning state and its expected reward.
    Step {
        n1: u8,
        n2: u8,
        #[arg(allow_negative_numbers = true)]
        a: i8,
    },
    /// List feasible actions for a state.
    Actions { n1: u8, n2: u8 },
    /// Solve for optimal policy.
    Solve {
        /// Directory for the final values.csv and policy.csv.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Directory for per-round value table and policy snapshots.
        #[arg(long)]
        snapshots: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = match &args.config_path {
        Some(path) => {
            info!("Reading config file: {}", path.display());
            RentalConfig::load(path)?
        }
        None => RentalConfig::default(),
    };
    info!("Calculating rental and return probabilities.");
    let mut rental = CarRental::new(config)?;

    match args.command {
        Commands::Probs => {
            println!("\n=== Location #1 ===");
            rental.dynamics().loc1.show();
            println!("\n=== Location #2 ===");
            rental.dynamics().loc2.show();
        }
        Commands::Reward { n1, n2 } => {
            let r = rental.dynamics().get_reward(&State::new(n1, n2))?;
            println!("Expected Reward: {:.2}", r);
        }
        Commands::Step { n1, n2, a } => {
            let (s, r) = rental.step(&State::new(n1, n2), a)?;
            println!("Morning state: {s}, expected reward: {r:.2}");
        }
        Commands::Actions { n1, n2 } => {
            let actions = rental.get_available_actions(&State::new(n1, n2))?;
            println!("{:?}", actions);
        }
        Commands::Solve { out, snapshots } => {
            let report = match snapshots {
                Some(dir) => rental.policy_iteration_with(&mut CsvSnapshots::new(&dir)?)?.1,
                None => rental.policy_iteration_with(&mut ())?.1,
            };
            println!(
                "Policy stable after {} rounds ({} evaluation sweeps).",
                report.rounds, report.sweeps
            );
            match out {
                Some(dir) => export::save_solution(&dir, &rental.values(), &rental.policy())?,
                None => {
                    println!("\n=== Policy (rows: site #1, columns: site #2) ===");
                    export::write_policy(std::io::stdout(), &rental.policy())?;
                }
            }
        }
    }
    Ok(())
}
