//! Charge and coverage state machines.

use warpline_core::{Position, WarplineConfig};

/// Charges granted for `fuel_items` fuel items.
pub fn fuel_charges(config: &WarplineConfig, fuel_items: u32) -> u32 {
    fuel_items.saturating_mul(config.charges_per_fuel)
}

/// Coverage of a position: no sky access, or too deep to operate.
pub fn is_covered(position: Position, sky_visible: bool, min_usable_y: i32) -> bool {
    !sky_visible || position.y < min_usable_y
}

/// Result of writing a coverage flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageTransition {
    Unchanged { covered: bool },
    /// Entered `covered = true`: sending and receiving are disabled.
    BecameCovered,
    BecameClear,
}

impl CoverageTransition {
    pub fn between(previous: bool, current: bool) -> Self {
        match (previous, current) {
            (false, true) => CoverageTransition::BecameCovered,
            (true, false) => CoverageTransition::BecameClear,
            (_, covered) => CoverageTransition::Unchanged { covered },
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, CoverageTransition::Unchanged { .. })
    }

    pub fn covered(&self) -> bool {
        match self {
            CoverageTransition::Unchanged { covered } => *covered,
            CoverageTransition::BecameCovered => true,
            CoverageTransition::BecameClear => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuel_scales_with_config() {
        let config = WarplineConfig {
            charges_per_fuel: 3,
            ..WarplineConfig::default()
        };
        assert_eq!(fuel_charges(&config, 4), 12);
        assert_eq!(fuel_charges(&config, u32::MAX), u32::MAX);
    }

    #[test]
    fn test_coverage_rule() {
        let surface = Position::new(0, 80, 0);
        let cave = Position::new(0, 20, 0);
        assert!(!is_covered(surface, true, 50));
        assert!(is_covered(surface, false, 50));
        assert!(is_covered(cave, true, 50));
        assert!(!is_covered(Position::new(0, 50, 0), true, 50));
    }

    #[test]
    fn test_transitions() {
        assert_eq!(CoverageTransition::between(false, true), CoverageTransition::BecameCovered);
        assert_eq!(CoverageTransition::between(true, false), CoverageTransition::BecameClear);
        let same = CoverageTransition::between(true, true);
        assert!(!same.is_change());
        assert!(same.covered());
    }
}
