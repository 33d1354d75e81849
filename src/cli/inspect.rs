use clap::Parser;

use crate::{
    cli::StateArgs,
    prelude::*,
    tables::{build_devices_table, build_generator_table, build_power_loss_table},
};

#[derive(Parser)]
pub struct InspectArgs {
    #[clap(flatten)]
    state: StateArgs,
}

impl InspectArgs {
    pub fn run(&self) {
        let store = self.state.generator_store();
        if !store.path().is_file() {
            warn!(path = %store.path().display(), "no generator state yet");
        }
        println!("{}", build_generator_table(&store.load()));

        let power_loss = self.state.power_loss_store().load();
        println!("{}", build_power_loss_table(&power_loss));
        if !power_loss.hp_devices.is_empty() {
            println!("{}", build_devices_table(&power_loss));
        }
    }
}
