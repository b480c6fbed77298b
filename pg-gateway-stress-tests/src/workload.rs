use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Forward,
    TriggerCutover,
}

/// Workload profiles controlling how often a driver iteration forces a
/// primary cut-over versus just exercising steady forwarding.
///
/// | Profile     | Forward % | Cut-over % |
/// |-------------|-----------|------------|
/// | SteadyOnly  |    100    |     0      |
/// | ChurnLight  |     95    |     5      |
/// | ChurnHeavy  |     70    |    30      |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadProfile {
    SteadyOnly,
    ChurnLight,
    ChurnHeavy,
}

impl WorkloadProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "steady-only" => Some(Self::SteadyOnly),
            "churn-light" => Some(Self::ChurnLight),
            "churn-heavy" => Some(Self::ChurnHeavy),
            _ => None,
        }
    }

    pub fn as_name(&self) -> &'static str {
        match self {
            Self::SteadyOnly => "steady-only",
            Self::ChurnLight => "churn-light",
            Self::ChurnHeavy => "churn-heavy",
        }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Op {
        let roll: u32 = rng.gen_range(0..100);
        self.op_for_roll(roll)
    }

    /// Map a roll in `0..100` to an `Op` according to the profile's
    /// percentages. Exposed for deterministic testing.
    pub fn op_for_roll(&self, roll: u32) -> Op {
        match self {
            WorkloadProfile::SteadyOnly => Op::Forward,
            WorkloadProfile::ChurnLight => {
                if roll < 95 { Op::Forward } else { Op::TriggerCutover }
            }
            WorkloadProfile::ChurnHeavy => {
                if roll < 70 { Op::Forward } else { Op::TriggerCutover }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_only_never_triggers_cutover() {
        for roll in 0..100 {
            assert_eq!(WorkloadProfile::SteadyOnly.op_for_roll(roll), Op::Forward);
        }
    }

    #[test]
    fn churn_light_boundary_is_at_95() {
        assert_eq!(WorkloadProfile::ChurnLight.op_for_roll(94), Op::Forward);
        assert_eq!(WorkloadProfile::ChurnLight.op_for_roll(95), Op::TriggerCutover);
    }

    #[test]
    fn from_name_round_trips_as_name() {
        for profile in [WorkloadProfile::SteadyOnly, WorkloadProfile::ChurnLight, WorkloadProfile::ChurnHeavy] {
            assert_eq!(WorkloadProfile::from_name(profile.as_name()), Some(profile));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(WorkloadProfile::from_name("bogus"), None);
    }
}
