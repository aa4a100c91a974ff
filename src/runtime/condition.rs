//! Condition rows and marking mutations

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::runtime::workflow::WorkflowId;

/// One condition (place) of one workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRow {
    /// Owning workflow instance
    pub workflow_id: WorkflowId,
    /// Condition name; implicit conditions use the `from->to` derived name
    pub name: String,
    /// Materialised from a direct task-to-task flow; invisible to user code
    pub implicit: bool,
    /// Token count; never negative
    pub marking: u64,
    /// Monotonic creation sequence
    pub seq: u64,
}

impl ConditionRow {
    /// Increase the marking by `n` tokens
    pub fn produce(&mut self, n: u64) {
        self.marking += n;
    }

    /// Decrease the marking by `n` tokens
    pub fn consume(&mut self, n: u64) -> EngineResult<()> {
        if self.marking < n {
            return Err(EngineError::MarkingUnderflow {
                workflow: self.workflow_id.to_string(),
                condition: self.name.clone(),
            });
        }
        self.marking -= n;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(marking: u64) -> ConditionRow {
        ConditionRow {
            workflow_id: WorkflowId::new(),
            name: "start".into(),
            implicit: false,
            marking,
            seq: 1,
        }
    }

    #[test]
    fn consume_below_zero_is_rejected() {
        let mut cond = row(1);
        cond.consume(1).unwrap();
        assert!(matches!(
            cond.consume(1),
            Err(EngineError::MarkingUnderflow { .. })
        ));
        assert_eq!(cond.marking, 0);
    }

    proptest! {
        #[test]
        fn marking_never_goes_negative(ops in prop::collection::vec((any::<bool>(), 1u64..4), 0..64)) {
            let mut cond = row(0);
            for (produce, n) in ops {
                let before = cond.marking;
                if produce {
                    cond.produce(n);
                    prop_assert_eq!(cond.marking, before + n);
                } else if cond.consume(n).is_ok() {
                    prop_assert_eq!(cond.marking, before - n);
                } else {
                    prop_assert_eq!(cond.marking, before);
                }
            }
        }
    }
}
