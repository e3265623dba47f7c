//! Weighted exam assembly from the active question pool.

use std::collections::BTreeSet;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::model::{ExamQuestionView, TopicPerformance};
use crate::store::Store;

#[cfg(test)]
mod tests;

/// Number of lowest-accuracy topics treated as weak.
pub const WEAK_TOPIC_LIMIT: usize = 5;
/// Share of an exam drawn from weak topics.
pub const WEAK_SHARE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleRequest {
    pub user_id: String,
    pub count: usize,
    pub topics: Option<Vec<String>>,
    pub exclude_seen: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPlan {
    /// Uniform draw restricted to the listed topics.
    Topics(Vec<String>),
    /// `round(count * WEAK_SHARE)` from the weak topics, the rest from all others.
    Weighted { weak_topics: Vec<String> },
}

pub struct ExamAssembler<'a> {
    store: &'a Store,
}

impl<'a> ExamAssembler<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Draws `count` distinct questions for `user_id`.
    ///
    /// A pool too small for the request fails with
    /// [`PipelineError::InsufficientQuestions`] rather than returning a short exam.
    pub fn assemble<R: Rng + ?Sized>(
        &self,
        request: &AssembleRequest,
        rng: &mut R,
    ) -> Result<Vec<ExamQuestionView>> {
        let mut pool = self.store.active_questions()?;
        let total_pool = pool.len();

        if request.exclude_seen {
            let seen = self.store.seen_question_ids(&request.user_id)?;
            pool = exclude_seen(pool, &seen);
        }

        let plan = match &request.topics {
            Some(topics) if !topics.is_empty() => SelectionPlan::Topics(topics.clone()),
            _ => SelectionPlan::Weighted {
                weak_topics: weak_topics(&self.store.topic_performance(&request.user_id)?),
            },
        };

        debug!(
            user_id = %request.user_id,
            total_pool,
            eligible = pool.len(),
            plan = ?plan,
            "assembling exam"
        );

        let selected = select_questions(pool, &plan, request.count, rng)?;
        info!(
            user_id = %request.user_id,
            count = selected.len(),
            exclude_seen = request.exclude_seen,
            "exam assembled"
        );
        Ok(selected)
    }
}

/// The `WEAK_TOPIC_LIMIT` lowest-accuracy topics; ties break by topic name.
pub fn weak_topics(performance: &[TopicPerformance]) -> Vec<String> {
    let mut rows = performance.iter().collect::<Vec<&TopicPerformance>>();
    rows.sort_by(|left, right| {
        left.accuracy
            .total_cmp(&right.accuracy)
            .then_with(|| left.topic.cmp(&right.topic))
    });
    rows.into_iter()
        .map(|row| row.topic.clone())
        .take(WEAK_TOPIC_LIMIT)
        .collect()
}

/// Weak-topic share of an exam of `count` questions, rounded half away from zero.
pub fn weak_share(count: usize) -> usize {
    (count as f64 * WEAK_SHARE).round() as usize
}

pub fn exclude_seen(pool: Vec<ExamQuestionView>, seen: &BTreeSet<String>) -> Vec<ExamQuestionView> {
    pool.into_iter()
        .filter(|question| !seen.contains(&question.question_id))
        .collect()
}

/// Pure selection over an already-filtered pool.
///
/// Weighted plans draw each share from its own pool first; a share its pool
/// cannot fill is backfilled uniformly from whatever both pools have left.
pub fn select_questions<R: Rng + ?Sized>(
    pool: Vec<ExamQuestionView>,
    plan: &SelectionPlan,
    count: usize,
    rng: &mut R,
) -> Result<Vec<ExamQuestionView>, PipelineError> {
    let mut selected = match plan {
        SelectionPlan::Topics(topics) => {
            let mut eligible = pool
                .into_iter()
                .filter(|question| topic_matches(topics, &question.topic))
                .collect::<Vec<ExamQuestionView>>();
            ensure_available(count, eligible.len())?;
            eligible.shuffle(rng);
            eligible.truncate(count);
            eligible
        }
        SelectionPlan::Weighted { weak_topics } => {
            ensure_available(count, pool.len())?;
            let (mut weak_pool, mut other_pool): (Vec<_>, Vec<_>) = pool
                .into_iter()
                .partition(|question| topic_matches(weak_topics, &question.topic));

            let weak_count = weak_share(count);
            let other_count = count - weak_count;

            weak_pool.shuffle(rng);
            other_pool.shuffle(rng);
            let mut leftover = weak_pool.split_off(weak_count.min(weak_pool.len()));
            leftover.extend(other_pool.split_off(other_count.min(other_pool.len())));

            let shortfall = count - weak_pool.len() - other_pool.len();
            if shortfall > 0 {
                debug!(
                    weak_drawn = weak_pool.len(),
                    other_drawn = other_pool.len(),
                    shortfall,
                    "backfilling from the combined pool"
                );
            }
            leftover.shuffle(rng);
            leftover.truncate(shortfall);

            let mut selected = weak_pool;
            selected.extend(other_pool);
            selected.extend(leftover);
            selected
        }
    };

    selected.shuffle(rng);
    Ok(selected)
}

fn ensure_available(requested: usize, available: usize) -> Result<(), PipelineError> {
    if available < requested {
        return Err(PipelineError::InsufficientQuestions {
            requested,
            available,
        });
    }
    Ok(())
}

fn topic_matches(topics: &[String], topic: &str) -> bool {
    topics
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(topic))
}
