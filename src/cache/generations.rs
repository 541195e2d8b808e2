//! Per-rule invalidation generations.
//!
//! The dispatcher advances a rule's generation before deleting its keys. A
//! cache-aside rebuild remembers the generation it started under and only
//! keeps its entry if no invalidation landed in the meantime.

use dashmap::DashMap;

use super::events::Epoch;

#[derive(Debug, Default)]
pub struct RuleGenerations {
    current: DashMap<i64, Epoch>,
}

impl RuleGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero for rules never invalidated in this process.
    pub fn current(&self, rule_id: i64) -> Epoch {
        self.current.get(&rule_id).map(|generation| *generation).unwrap_or(0)
    }

    /// Move every rule past the event's epoch. Each call strictly advances the
    /// generation, even when events are dispatched out of epoch order.
    pub fn advance<'a>(&self, rule_ids: impl IntoIterator<Item = &'a i64>, epoch: Epoch) {
        let floor = epoch.saturating_add(1);
        for rule_id in rule_ids {
            self.current
                .entry(*rule_id)
                .and_modify(|generation| *generation = generation.saturating_add(1).max(floor))
                .or_insert(floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_only_named_rules() {
        let generations = RuleGenerations::new();
        assert_eq!(generations.current(5), 0);

        generations.advance(&[5, 6], 0);
        assert_eq!(generations.current(5), 1);
        assert_eq!(generations.current(6), 1);
        assert_eq!(generations.current(7), 0);
    }

    #[test]
    fn older_epoch_still_advances() {
        let generations = RuleGenerations::new();
        generations.advance(&[5], 9);
        assert_eq!(generations.current(5), 10);

        generations.advance(&[5], 3);
        assert_eq!(generations.current(5), 11);
    }
}
