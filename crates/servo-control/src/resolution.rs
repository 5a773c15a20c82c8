use crate::{Register, Resolution};
use std::collections::BTreeMap;

/// Per-register override map, as supplied by callers or a session config.
pub type ResolutionOverrides = BTreeMap<Register, Resolution>;

/// Immutable register -> resolution table used to build telemetry queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResolution {
    entries: BTreeMap<Register, Resolution>,
}

impl Default for QueryResolution {
    /// Built-in table: status registers at int8, motion at f32, the rest ignored.
    fn default() -> Self {
        let entries = [
            (Register::Mode, Resolution::Int8),
            (Register::Position, Resolution::Float32),
            (Register::Velocity, Resolution::Float32),
            (Register::Torque, Resolution::Float32),
            (Register::QCurrent, Resolution::Ignore),
            (Register::DCurrent, Resolution::Ignore),
            (Register::AbsPosition, Resolution::Ignore),
            (Register::MotorTemperature, Resolution::Ignore),
            (Register::TrajectoryComplete, Resolution::Ignore),
            (Register::HomeState, Resolution::Ignore),
            (Register::Voltage, Resolution::Int8),
            (Register::Temperature, Resolution::Int8),
            (Register::Fault, Resolution::Int8),
        ]
        .into_iter()
        .collect();
        Self { entries }
    }
}

impl QueryResolution {
    /// Merge `overrides` over `defaults`; an override replaces the whole entry.
    pub fn merge(defaults: &QueryResolution, overrides: &ResolutionOverrides) -> Self {
        let mut entries = defaults.entries.clone();
        for (reg, res) in overrides {
            entries.insert(*reg, *res);
        }
        Self { entries }
    }

    /// The built-in table with `overrides` applied.
    pub fn with_overrides(overrides: &ResolutionOverrides) -> Self {
        Self::merge(&Self::default(), overrides)
    }

    pub fn resolve(&self, register: Register) -> Resolution {
        self.entries
            .get(&register)
            .copied()
            .unwrap_or(Resolution::Ignore)
    }

    /// Registers to put on the wire, in register order.
    pub fn query_list(&self) -> Vec<(Register, Resolution)> {
        self.entries
            .iter()
            .filter(|(_, res)| **res != Resolution::Ignore)
            .map(|(reg, res)| (*reg, *res))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_loop_overrides() -> ResolutionOverrides {
        [
            (Register::ControlPosition, Resolution::Float32),
            (Register::ControlVelocity, Resolution::Float32),
            (Register::ControlTorque, Resolution::Float32),
            (Register::PositionError, Resolution::Float32),
            (Register::VelocityError, Resolution::Float32),
            (Register::TorqueError, Resolution::Float32),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn absent_registers_resolve_to_ignore() {
        let qr = QueryResolution::default();
        assert_eq!(qr.resolve(Register::ControlPosition), Resolution::Ignore);
        assert_eq!(qr.resolve(Register::Mode), Resolution::Int8);
    }

    #[test]
    fn override_wins_and_defaults_survive() {
        let defaults = QueryResolution::default();
        let mut overrides = control_loop_overrides();
        overrides.insert(Register::Position, Resolution::Int16);
        overrides.insert(Register::Voltage, Resolution::Ignore);
        let merged = QueryResolution::merge(&defaults, &overrides);

        for reg in Register::ALL {
            let expected = overrides
                .get(&reg)
                .copied()
                .unwrap_or_else(|| defaults.resolve(reg));
            assert_eq!(merged.resolve(reg), expected, "{reg}");
        }
    }

    #[test]
    fn empty_override_is_identity() {
        let defaults = QueryResolution::default();
        assert_eq!(QueryResolution::merge(&defaults, &BTreeMap::new()), defaults);
    }

    #[test]
    fn query_list_skips_ignored() {
        let qr = QueryResolution::with_overrides(&control_loop_overrides());
        let list = qr.query_list();
        assert!(list.iter().all(|(_, r)| *r != Resolution::Ignore));
        assert_eq!(list.first(), Some(&(Register::Mode, Resolution::Int8)));
        assert!(list.contains(&(Register::TorqueError, Resolution::Float32)));
        assert_eq!(list.len(), 7 + 6);
    }
}
