//! Skip-or-execute decision
//!
//! A step is replayed when the calls made so far in this attempt are a
//! prefix of (or equal to) the durable call stack. The first call that
//! diverges from, or extends past, the durable stack is the resume point.

use crate::domain::step_id::StepId;

/// Whether the latest call in `in_progress` should be replayed from history
pub fn is_skip(durable: &[StepId], in_progress: &[StepId]) -> bool {
    let durable = dedup_consecutive(durable);
    let in_progress = dedup_consecutive(in_progress);

    if in_progress.len() > durable.len() {
        return false;
    }

    in_progress.iter().zip(durable.iter()).all(|(a, b)| a == b)
}

fn dedup_consecutive(ids: &[StepId]) -> Vec<&StepId> {
    let mut out: Vec<&StepId> = Vec::with_capacity(ids.len());
    for id in ids {
        if out.last() != Some(&id) {
            out.push(id);
        }
    }
    out
}
