//! Attack resolution: what a lock event sends, cancels and materializes.

use super::combo::combo_bonus;

/// Garbage sent for a raw line clear, before combo bonuses. T-spins and
/// perfect clears are not modelled.
pub fn base_attack(lines_cleared: u32) -> u32 {
    match lines_cleared {
        2 => 1,
        3 => 2,
        4 => 4,
        _ => 0,
    }
}

/// What one lock event does to outgoing and incoming garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResolution {
    /// Net attack to broadcast (total minus whatever cancelled pending).
    pub attack_sent: u32,
    /// Pending garbage cancelled by this lock's clears.
    pub cancelled: u32,
    /// Pending garbage to materialize onto the board right now.
    pub materialized: u32,
}

/// Resolve a lock event. Clearing locks cancel pending garbage before any
/// attack leaves; only a zero-clear lock materializes what is still pending.
pub fn resolve_lock(lines_cleared: u32, combo_count: u32, pending: u32) -> LockResolution {
    if lines_cleared > 0 {
        let total = base_attack(lines_cleared) + combo_bonus(combo_count);
        let cancelled = total.min(pending);
        LockResolution {
            attack_sent: total - cancelled,
            cancelled,
            materialized: 0,
        }
    } else {
        LockResolution {
            attack_sent: 0,
            cancelled: 0,
            materialized: pending,
        }
    }
}
