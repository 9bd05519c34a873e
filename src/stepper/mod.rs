use crate::errors::{RefineError, Result};

/// Position over the record's categories. Never persisted server side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stepper {
    step: usize,
}

impl Stepper {
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn go_to(self, i: usize, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(RefineError::MissingData("record has no categories".into()));
        }
        if i >= count {
            return Err(RefineError::MissingData(format!(
                "category {i} does not exist (record has {count})"
            )));
        }
        Ok(Self { step: i })
    }

    pub fn next(self, count: usize) -> Result<Self> {
        self.go_to(self.step + 1, count)
    }

    pub fn prev(self, count: usize) -> Result<Self> {
        match self.step.checked_sub(1) {
            Some(i) => self.go_to(i, count),
            None => Err(RefineError::MissingData("already at the first category".into())),
        }
    }

    /// Merge is only offered from the last category.
    pub fn is_last(&self, count: usize) -> bool {
        count > 0 && self.step == count - 1
    }
}
