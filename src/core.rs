pub mod capability;
pub mod clock;
pub mod generator;
pub mod power_loss;
pub mod reporter;
pub mod shutdown;
