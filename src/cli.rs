mod inspect;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use self::{inspect::InspectArgs, run::RunArgs};
use crate::{
    core::{generator::AutomationState, power_loss::PowerLossState},
    store::Store,
};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
#[must_use]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Main command: run the generator automation and the power-loss protection until terminated.
    #[clap(name = "run")]
    Run(Box<RunArgs>),

    /// Print the persisted automation state.
    #[clap(name = "inspect")]
    Inspect(InspectArgs),
}

#[derive(Parser)]
pub struct StateArgs {
    /// Directory with the persisted automation state.
    #[clap(long, env = "STATE_DIR", default_value = ".")]
    pub state_dir: PathBuf,
}

impl StateArgs {
    pub fn generator_store(&self) -> Store<AutomationState> {
        Store::new(self.state_dir.join("state.json"))
    }

    pub fn power_loss_store(&self) -> Store<PowerLossState> {
        Store::new(self.state_dir.join("hpItems.json"))
    }
}
