//! Arithmetic checks on a table's vote count before it is submitted.

use std::collections::BTreeSet;
use thiserror::Error;

use super::types::VoteResult;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResultIssue {
  #[error("votes add up to {counted} but {voters} people voted")]
  SumMismatch { counted: u64, voters: u32 },

  #[error("{voters} voters exceed the {registered} registered electors")]
  TooManyVoters { voters: u32, registered: u32 },

  #[error("list {0} appears more than once")]
  DuplicateList(String),
}

/// Every problem found in `result`, empty when it reconciles.
pub fn check_result(result: &VoteResult) -> Vec<ResultIssue> {
  let mut issues = Vec::new();

  let counted = result.lists.iter().map(|l| u64::from(l.votes)).sum::<u64>()
    + u64::from(result.blank)
    + u64::from(result.null)
    + u64::from(result.contested);
  if counted != u64::from(result.voters) {
    issues.push(ResultIssue::SumMismatch {
      counted,
      voters: result.voters,
    });
  }

  if result.voters > result.registered {
    issues.push(ResultIssue::TooManyVoters {
      voters: result.voters,
      registered: result.registered,
    });
  }

  let mut seen = BTreeSet::new();
  for list in &result.lists {
    if !seen.insert(list.list.as_str()) {
      issues.push(ResultIssue::DuplicateList(list.list.clone()));
    }
  }

  issues
}
