//! LaneCursor - アイドルな worker がレーンを見る順番
//!
//! - strict: 常に high → normal → low
//! - weighted: smooth weighted round-robin で先頭レーンを選び、残りは strict 順

use crate::config::LaneSelection;
use crate::domain::PriorityLane;

/// Per-worker cursor yielding the order in which lanes are polled.
///
/// Strict mode always polls high, normal, low. Weighted mode runs a smooth
/// weighted round-robin to pick which lane goes first; the other lanes follow
/// in strict order, so an empty first choice never idles the worker.
#[derive(Debug, Clone)]
pub struct LaneCursor {
    selection: LaneSelection,
    current: [i64; 3],
}

impl LaneCursor {
    pub fn new(selection: LaneSelection) -> Self {
        Self {
            selection,
            current: [0; 3],
        }
    }

    pub fn next_order(&mut self) -> [PriorityLane; 3] {
        let LaneSelection::Weighted { high, normal, low } = self.selection else {
            return PriorityLane::DISPATCH_ORDER;
        };

        let weights = [i64::from(high), i64::from(normal), i64::from(low)];
        let total: i64 = weights.iter().sum();
        if total == 0 {
            return PriorityLane::DISPATCH_ORDER;
        }

        for (current, weight) in self.current.iter_mut().zip(weights) {
            *current += weight;
        }
        // ties go to the higher priority lane
        let mut first = 0;
        for i in 1..3 {
            if self.current[i] > self.current[first] {
                first = i;
            }
        }
        self.current[first] -= total;

        let lead = PriorityLane::DISPATCH_ORDER[first];
        let mut order = [lead; 3];
        let rest = PriorityLane::DISPATCH_ORDER
            .into_iter()
            .filter(|lane| *lane != lead);
        for (slot, lane) in order[1..].iter_mut().zip(rest) {
            *slot = lane;
        }
        order
    }
}

impl Default for LaneCursor {
    fn default() -> Self {
        Self::new(LaneSelection::Strict)
    }
}
