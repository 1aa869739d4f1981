use std::error::Error;
use std::fmt::{self, Display};

/// Which basis-state index bits an operation is conditioned on.
///
/// `inclusion_mask` selects the participating wire bits and `desired_mask`
/// gives the value each of them must have. A state index is allowed when its
/// included bits match the desired values exactly; everything else passes
/// through an operation unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlMask {
    inclusion_mask: u32,
    desired_mask: u32,
}

impl ControlMask {
    /// The mask that allows every state.
    pub const NO_CONTROLS: ControlMask = ControlMask {
        inclusion_mask: 0,
        desired_mask: 0,
    };

    /// # Panics
    /// If `desired_mask` sets a bit outside `inclusion_mask`.
    pub fn new(inclusion_mask: u32, desired_mask: u32) -> ControlMask {
        assert_eq!(
            desired_mask & !inclusion_mask,
            0,
            "desired bit outside the inclusion mask"
        );
        ControlMask {
            inclusion_mask,
            desired_mask,
        }
    }

    /// Condition on the single wire `bit` reading `desired`.
    pub fn from_bit_is(bit: u32, desired: bool) -> ControlMask {
        let mask = 1 << bit;
        ControlMask {
            inclusion_mask: mask,
            desired_mask: if desired { mask } else { 0 },
        }
    }

    pub fn inclusion_mask(self) -> u32 {
        self.inclusion_mask
    }

    pub fn desired_mask(self) -> u32 {
        self.desired_mask
    }

    /// Whether an operation under this mask applies at `state_index`.
    pub fn allows_state(self, state_index: u32) -> bool {
        state_index & self.inclusion_mask == self.desired_mask
    }

    /// The required value of `bit`, or `None` if the bit is unconstrained.
    pub fn desired_value_for(self, bit: u32) -> Option<bool> {
        if self.inclusion_mask & (1 << bit) == 0 {
            return None;
        }
        Some(self.desired_mask & (1 << bit) != 0)
    }

    /// Merge two masks into one that requires both.
    ///
    /// Fails when the masks disagree about a bit they both include.
    pub fn combine(self, other: ControlMask) -> Result<ControlMask, ContradictoryControls> {
        let shared = self.inclusion_mask & other.inclusion_mask;
        if self.desired_mask & shared != other.desired_mask & shared {
            return Err(ContradictoryControls {
                bits: (self.desired_mask ^ other.desired_mask) & shared,
            });
        }
        Ok(ControlMask {
            inclusion_mask: self.inclusion_mask | other.inclusion_mask,
            desired_mask: self.desired_mask | other.desired_mask,
        })
    }

    pub fn included_bit_count(self) -> u32 {
        self.inclusion_mask.count_ones()
    }
}

/// Two combined masks demanded opposite values for the same wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContradictoryControls {
    bits: u32,
}

impl ContradictoryControls {
    /// Bitmask of the wires the two sides disagreed on.
    pub fn bits(self) -> u32 {
        self.bits
    }
}

impl Display for ContradictoryControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contradictory controls on wire bits {:#b}", self.bits)
    }
}

impl Error for ContradictoryControls {}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<ControlMask> {
        vec![
            ControlMask::NO_CONTROLS,
            ControlMask::from_bit_is(0, true),
            ControlMask::from_bit_is(0, false),
            ControlMask::from_bit_is(3, true),
            ControlMask::new(0b1010, 0b1000),
            ControlMask::new(0b0110, 0b0110),
        ]
    }

    #[test]
    fn combine_is_commutative() {
        for &a in &samples() {
            for &b in &samples() {
                assert_eq!(a.combine(b).ok(), b.combine(a).ok(), "{a:?} {b:?}");
            }
        }
    }

    #[test]
    fn no_controls_is_identity() {
        for &a in &samples() {
            assert_eq!(ControlMask::NO_CONTROLS.combine(a), Ok(a));
            assert_eq!(a.combine(ControlMask::NO_CONTROLS), Ok(a));
        }
    }

    #[test]
    fn combine_is_idempotent() {
        for &a in &samples() {
            assert_eq!(a.combine(a), Ok(a));
        }
    }

    #[test]
    fn combine_rejects_contradictions() {
        let on = ControlMask::from_bit_is(2, true);
        let off = ControlMask::from_bit_is(2, false);
        let err = on.combine(off).unwrap_err();
        assert_eq!(err.bits(), 0b100);
    }

    #[test]
    fn allows_state_matches_per_bit_checks() {
        for &mask in &samples() {
            for state in 0..16u32 {
                let per_bit = (0..4).all(|bit| match mask.desired_value_for(bit) {
                    Some(desired) => (state >> bit & 1 == 1) == desired,
                    None => true,
                });
                assert_eq!(mask.allows_state(state), per_bit, "{mask:?} state {state}");
            }
        }
    }

    #[test]
    fn desired_value_for_reports_tri_state() {
        let mask = ControlMask::new(0b101, 0b001);
        assert_eq!(mask.desired_value_for(0), Some(true));
        assert_eq!(mask.desired_value_for(1), None);
        assert_eq!(mask.desired_value_for(2), Some(false));
    }

    #[test]
    fn included_bit_count_counts_inclusions() {
        assert_eq!(ControlMask::NO_CONTROLS.included_bit_count(), 0);
        assert_eq!(ControlMask::new(0b1011, 0b0010).included_bit_count(), 3);
    }

    #[test]
    #[should_panic]
    fn desired_outside_inclusion_is_rejected() {
        ControlMask::new(0b01, 0b10);
    }
}
