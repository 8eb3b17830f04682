//! Built-in fault model for a spacecraft power and thermal subsystem.
//!
//! Seven root causes, eight intermediate states and eight measured
//! quantities. Edge weights are static engineering judgement, not learned.
//! Battery temperature also degrades efficiency in practice, but that
//! feedback closes a loop through battery state and is left out of the DAG.

use super::{CausalGraph, GraphBuilder, GraphError, IndependenceClaim, Node, NodeKind, Polarity};
use crate::ranking::ChannelMap;

use NodeKind::{Intermediate, Observable, RootCause};
use Polarity::{Decrease, Increase, Unspecified};

pub fn power_thermal_graph() -> Result<CausalGraph, GraphError> {
    let root = |name: &str, description: &str, modes: &[&str]| {
        Node::new(name, RootCause)
            .with_description(description)
            .with_degradation_modes(modes.iter().copied())
    };
    let state = |name: &str, description: &str, unit: &str| {
        Node::new(name, Intermediate)
            .with_description(description)
            .with_unit(unit)
    };
    let measured = |name: &str, description: &str, unit: &str| {
        Node::new(name, Observable)
            .with_description(description)
            .with_unit(unit)
    };

    GraphBuilder::new()
        .node(root(
            "solar_degradation",
            "Solar panel efficiency loss or shadowing",
            &["panel_aging", "dust_accumulation", "partial_shadowing"],
        ))
        .node(root(
            "battery_aging",
            "Battery cell degradation and capacity loss",
            &["cell_aging", "internal_resistance_rise"],
        ))
        .node(root(
            "battery_thermal",
            "Excessive battery temperature stress",
            &["thermal_runaway_risk", "efficiency_loss"],
        ))
        .node(root(
            "sensor_bias",
            "Measurement bias or sensor drift",
            &["calibration_drift", "electronic_aging"],
        ))
        .node(root(
            "panel_insulation_degradation",
            "Solar panel insulation or radiator fouling",
            &["insulation_loss", "radiator_fouling"],
        ))
        .node(root(
            "battery_heatsink_failure",
            "Battery thermal management system failure",
            &["heatsink_blockage", "coolant_loss"],
        ))
        .node(root(
            "payload_radiator_degradation",
            "Payload electronics radiator degradation",
            &["radiator_coating_loss", "micrometeorite_damage"],
        ))
        .node(state("solar_input", "Available solar power from panels", "W"))
        .node(state("battery_efficiency", "Battery charge/discharge efficiency", ""))
        .node(state("battery_state", "Battery charge capacity and health", "%"))
        .node(state("bus_regulation", "Bus voltage regulation quality", ""))
        .node(state("solar_panel_temp", "Solar panel temperature", "C"))
        .node(state("battery_temp", "Battery cell temperature", "C"))
        .node(state("payload_temp", "Payload electronics temperature", "C"))
        .node(state("thermal_stress", "Overall system thermal stress level", ""))
        .node(measured("solar_input_measured", "Measured solar input power", "W"))
        .node(measured("battery_voltage_measured", "Measured battery voltage", "V"))
        .node(measured(
            "battery_charge_measured",
            "Measured battery charge state percentage",
            "%",
        ))
        .node(measured("bus_voltage_measured", "Measured bus output voltage", "V"))
        .node(measured(
            "solar_panel_temp_measured",
            "Measured solar panel temperature",
            "C",
        ))
        .node(measured("battery_temp_measured", "Measured battery temperature", "C"))
        .node(measured("payload_temp_measured", "Measured payload temperature", "C"))
        .node(measured(
            "bus_current_measured",
            "Measured bus current (power dissipation proxy)",
            "A",
        ))
        // Faults into physical state
        .signed_edge(
            "solar_degradation",
            "solar_input",
            0.95,
            Decrease,
            "Reduced panel output due to physical degradation or shadowing",
        )
        .signed_edge(
            "battery_aging",
            "battery_efficiency",
            0.85,
            Decrease,
            "Increased internal resistance reduces charge/discharge efficiency",
        )
        .signed_edge(
            "battery_thermal",
            "battery_efficiency",
            0.75,
            Decrease,
            "High temperature degrades battery electrochemistry and increases losses",
        )
        .signed_edge(
            "panel_insulation_degradation",
            "solar_panel_temp",
            0.9,
            Increase,
            "Poor insulation or radiator coating prevents radiative cooling to space",
        )
        .signed_edge(
            "battery_heatsink_failure",
            "battery_temp",
            0.95,
            Increase,
            "Failed heatsink eliminates the primary cooling path for battery heat",
        )
        .signed_edge(
            "payload_radiator_degradation",
            "payload_temp",
            0.9,
            Increase,
            "Degraded radiator reduces heat dissipation to space",
        )
        // Power propagation
        .signed_edge(
            "solar_input",
            "battery_state",
            0.9,
            Increase,
            "Reduced input power cannot recharge battery to nominal capacity",
        )
        .signed_edge(
            "battery_efficiency",
            "battery_state",
            0.85,
            Increase,
            "Lower efficiency means less power actually stored per unit of solar input",
        )
        .signed_edge(
            "battery_state",
            "bus_regulation",
            0.8,
            Increase,
            "Degraded battery supply makes regulation harder and less stable",
        )
        // Thermal propagation
        .signed_edge(
            "battery_state",
            "battery_temp",
            0.8,
            Decrease,
            "Low battery state forces higher discharge current, generating more I2R heat",
        )
        .signed_edge(
            "solar_input",
            "solar_panel_temp",
            0.85,
            Increase,
            "Incident solar radiation heats the panel",
        )
        .signed_edge(
            "bus_regulation",
            "payload_temp",
            0.7,
            Increase,
            "Available regulated power enables payload operation, generating heat",
        )
        .signed_edge(
            "battery_temp",
            "thermal_stress",
            0.7,
            Increase,
            "High battery temperature is the critical thermal stress indicator",
        )
        .signed_edge(
            "payload_temp",
            "thermal_stress",
            0.6,
            Increase,
            "High payload temperature reduces mission thermal margins",
        )
        .signed_edge(
            "solar_panel_temp",
            "thermal_stress",
            0.5,
            Increase,
            "High panel temperature indicates reduced thermal margin",
        )
        // Measurements
        .signed_edge(
            "solar_input",
            "solar_input_measured",
            1.0,
            Increase,
            "Direct measurement of solar power via sensor",
        )
        .signed_edge(
            "battery_state",
            "battery_voltage_measured",
            0.95,
            Increase,
            "Battery voltage reflects state of charge via electrochemical potential",
        )
        .signed_edge(
            "battery_efficiency",
            "battery_voltage_measured",
            0.7,
            Increase,
            "Efficiency degradation causes voltage droop due to increased internal resistance",
        )
        .signed_edge(
            "battery_state",
            "battery_charge_measured",
            0.9,
            Increase,
            "Charge sensor reports actual state of charge of battery",
        )
        .signed_edge(
            "bus_regulation",
            "bus_voltage_measured",
            0.95,
            Increase,
            "Bus voltage sensor directly measures regulator output",
        )
        .signed_edge(
            "battery_state",
            "bus_voltage_measured",
            0.75,
            Increase,
            "Battery state affects available power for regulation",
        )
        .signed_edge(
            "sensor_bias",
            "battery_voltage_measured",
            0.5,
            Unspecified,
            "Sensor drift and calibration error add bias to voltage readings",
        )
        .signed_edge(
            "sensor_bias",
            "battery_charge_measured",
            0.5,
            Unspecified,
            "Sensor drift affects charge state estimation algorithms",
        )
        .signed_edge(
            "solar_panel_temp",
            "solar_panel_temp_measured",
            0.98,
            Increase,
            "Direct temperature sensor measurement via thermistor",
        )
        .signed_edge(
            "battery_temp",
            "battery_temp_measured",
            0.95,
            Increase,
            "Battery thermistor directly measures cell temperature",
        )
        .signed_edge(
            "payload_temp",
            "payload_temp_measured",
            0.96,
            Increase,
            "Payload thermal sensor provides local temperature measurement",
        )
        .signed_edge(
            "battery_state",
            "bus_current_measured",
            0.8,
            Decrease,
            "Low battery state increases regulation effort and current draw",
        )
        .signed_edge(
            "battery_efficiency",
            "bus_current_measured",
            0.7,
            Decrease,
            "Reduced efficiency requires higher current to deliver the same power",
        )
        .build()
}

/// Telemetry channel names as they arrive from the spacecraft.
pub fn power_thermal_channels() -> ChannelMap {
    ChannelMap::from_pairs([
        ("solar_input", "solar_input_measured"),
        ("battery_voltage", "battery_voltage_measured"),
        ("battery_charge", "battery_charge_measured"),
        ("bus_voltage", "bus_voltage_measured"),
        ("solar_panel_temp", "solar_panel_temp_measured"),
        ("battery_temp", "battery_temp_measured"),
        ("payload_temp", "payload_temp_measured"),
        ("bus_current", "bus_current_measured"),
    ])
}

/// Structural assumptions the diagnosis relies on.
pub fn power_thermal_claims() -> Vec<IndependenceClaim> {
    vec![
        IndependenceClaim::separated(
            "solar_mediated_by_battery",
            "solar_degradation",
            "bus_voltage_measured",
            &["battery_state"],
        ),
        IndependenceClaim::separated(
            "aging_distinct_from_thermal",
            "battery_aging",
            "battery_temp_measured",
            &["battery_efficiency"],
        ),
        IndependenceClaim::separated(
            "payload_isolated",
            "payload_radiator_degradation",
            "bus_voltage_measured",
            &[],
        ),
        IndependenceClaim::separated("sensor_bias_identifiable", "sensor_bias", "battery_state", &[]),
        IndependenceClaim::connected(
            "solar_reaches_bus",
            "solar_degradation",
            "bus_voltage_measured",
            &[],
        ),
    ]
}
