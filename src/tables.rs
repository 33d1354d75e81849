use chrono::{DateTime, Local, Utc};
use comfy_table::{Attribute, Cell, Color, Table, modifiers, presets};

use crate::core::{generator::AutomationState, power_loss::PowerLossState};

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table
}

fn flag_cell(value: bool) -> Cell {
    if value { Cell::new("yes").fg(Color::Red) } else { Cell::new("no").fg(Color::Green) }
}

/// Zero timestamp means «never».
fn timestamp_cell(timestamp: DateTime<Utc>) -> Cell {
    if timestamp == DateTime::<Utc>::default() {
        Cell::new("never").add_attribute(Attribute::Dim)
    } else {
        Cell::new(timestamp.with_timezone(&Local).format("%b %d %H:%M:%S"))
    }
}

pub fn build_generator_table(state: &AutomationState) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Generator", ""]);
    table.add_row(vec![Cell::new("Automation triggered"), flag_cell(state.triggered)]);
    table.add_row(vec![Cell::new("Last started"), timestamp_cell(state.last_started)]);
    table.add_row(vec![Cell::new("Last stopped"), timestamp_cell(state.last_stopped)]);
    table
}

pub fn build_power_loss_table(state: &PowerLossState) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Power loss", ""]);
    table.add_row(vec![Cell::new("Shed"), flag_cell(state.shutdown_due_to_power_out)]);
    table.add_row(vec![Cell::new("Last low voltage"), timestamp_cell(state.last_shutdown_time)]);
    table
}

pub fn build_devices_table(state: &PowerLossState) -> Table {
    let mut table = new_table();
    table.set_header(vec!["ID", "Name", "Cached state", "Shed"]);
    for (id, device) in &state.hp_devices {
        table.add_row(vec![
            Cell::new(id).add_attribute(Attribute::Dim),
            Cell::new(&device.name),
            Cell::new(&device.state),
            flag_cell(device.shed),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::power_loss::HpDeviceRecord;

    #[test]
    fn generator_table_ok() {
        let state = AutomationState {
            last_started: DateTime::from_timestamp(1_767_225_600, 0).unwrap(),
            triggered: true,
            ..AutomationState::default()
        };
        let rendered = build_generator_table(&state).to_string();
        assert!(rendered.contains("yes"));
        assert!(rendered.contains("never"));
    }

    #[test]
    fn devices_table_ok() {
        let mut state = PowerLossState::default();
        state.hp_devices.insert(
            "thermostat".to_string(),
            HpDeviceRecord { name: "Thermostat".to_string(), state: "HEAT".to_string(), shed: true },
        );
        let rendered = build_devices_table(&state).to_string();
        assert!(rendered.contains("thermostat"));
        assert!(rendered.contains("HEAT"));
    }
}
