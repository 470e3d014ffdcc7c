//! Derivations over scoring events and the per-submission score list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AdminId, CommentEvent, CommentKind, ScoreEntry, ScorePayload};

pub const MAX_CRITERION: u8 = 10;
pub const MAX_TOTAL: u8 = MAX_CRITERION * 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("{criterion} score {value} is outside 0..={MAX_CRITERION}")]
    OutOfRange { criterion: &'static str, value: i64 },
    #[error("total score {supplied} does not match the sum of criteria {computed}")]
    TotalMismatch { supplied: i64, computed: u8 },
}

pub fn recompute_total(payload: &ScorePayload) -> u8 {
    payload
        .criteria()
        .iter()
        .fold(0u8, |total, (_, value)| total.saturating_add(*value))
}

/// Rejects out-of-range criteria and totals that disagree with the criteria.
pub fn validate_scores(payload: &ScorePayload) -> Result<(), ScoreError> {
    for (criterion, value) in payload.criteria() {
        if value > MAX_CRITERION {
            return Err(ScoreError::OutOfRange {
                criterion,
                value: value.into(),
            });
        }
    }
    let computed = recompute_total(payload);
    if payload.total_score != computed {
        return Err(ScoreError::TotalMismatch {
            supplied: payload.total_score.into(),
            computed,
        });
    }
    Ok(())
}

fn visible_scoring(events: &[CommentEvent]) -> impl Iterator<Item = &CommentEvent> {
    events
        .iter()
        .filter(|e| !e.is_deleted && e.kind() == CommentKind::Scoring)
}

/// Latest non-deleted scoring event by `author_id`. Equal creation instants
/// are resolved by the larger event id, so input order never matters.
pub fn latest_score_event_by_author<'a>(
    events: &'a [CommentEvent],
    author_id: &AdminId,
) -> Option<&'a CommentEvent> {
    visible_scoring(events)
        .filter(|e| &e.author.id == author_id)
        .max_by(|a, b| a.recency_cmp(b))
}

pub fn latest_score_by_author<'a>(
    events: &'a [CommentEvent],
    author_id: &AdminId,
) -> Option<&'a ScorePayload> {
    latest_score_event_by_author(events, author_id).and_then(|e| e.body.score_payload())
}

pub fn latest_scores_by_author(events: &[CommentEvent]) -> BTreeMap<AdminId, &CommentEvent> {
    let mut latest: BTreeMap<AdminId, &CommentEvent> = BTreeMap::new();
    for event in visible_scoring(events) {
        match latest.get(&event.author.id) {
            Some(current) if current.recency_cmp(event).is_ge() => {}
            _ => {
                latest.insert(event.author.id.clone(), event);
            }
        }
    }
    latest
}

/// All visible scoring events of one author, oldest first.
pub fn score_history<'a>(events: &'a [CommentEvent], author_id: &AdminId) -> Vec<&'a CommentEvent> {
    let mut history: Vec<_> = visible_scoring(events)
        .filter(|e| &e.author.id == author_id)
        .collect();
    history.sort_by(|a, b| a.recency_cmp(b));
    history
}

/// Drops any entry by `author_id` and appends `new_score`; other entries keep their order.
pub fn replace_author_score(
    scores: &[ScoreEntry],
    author_id: &AdminId,
    new_score: ScoreEntry,
) -> Vec<ScoreEntry> {
    let mut next: Vec<ScoreEntry> = scores
        .iter()
        .filter(|entry| &entry.author_id != author_id)
        .cloned()
        .collect();
    next.push(new_score);
    next
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionAverages {
    pub technical: f64,
    pub story: f64,
    pub creativity: f64,
    pub chiangmai: f64,
    pub human_effort: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub average_total: Option<f64>,
    pub min_total: Option<u8>,
    pub max_total: Option<u8>,
    pub criteria: Option<CriterionAverages>,
}

pub fn summarize(scores: &[ScoreEntry]) -> ScoreSummary {
    if scores.is_empty() {
        return ScoreSummary {
            count: 0,
            average_total: None,
            min_total: None,
            max_total: None,
            criteria: None,
        };
    }
    let n = scores.len() as f64;
    let avg = |pick: fn(&ScorePayload) -> u8| {
        scores.iter().map(|s| f64::from(pick(&s.scores))).sum::<f64>() / n
    };
    ScoreSummary {
        count: scores.len(),
        average_total: Some(avg(|p| p.total_score)),
        min_total: scores.iter().map(|s| s.scores.total_score).min(),
        max_total: scores.iter().map(|s| s.scores.total_score).max(),
        criteria: Some(CriterionAverages {
            technical: avg(|p| p.technical),
            story: avg(|p| p.story),
            creativity: avg(|p| p.creativity),
            chiangmai: avg(|p| p.chiangmai),
            human_effort: avg(|p| p.human_effort),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreDrift {
    /// The list holds a score the log has no scoring event for.
    MissingFromLog { author_id: AdminId },
    /// The log has a scoring event the list does not reflect.
    MissingFromList { author_id: AdminId },
    /// Both exist but carry different values.
    Mismatch {
        author_id: AdminId,
        list: ScorePayload,
        log: ScorePayload,
    },
}

/// Compares the score list against the latest scoring event per admin in the log.
pub fn score_drift(events: &[CommentEvent], scores: &[ScoreEntry]) -> Vec<ScoreDrift> {
    let latest = latest_scores_by_author(events);
    let mut drift = Vec::new();
    for entry in scores {
        match latest
            .get(&entry.author_id)
            .and_then(|e| e.body.score_payload())
        {
            None => drift.push(ScoreDrift::MissingFromLog {
                author_id: entry.author_id.clone(),
            }),
            Some(log) if *log != entry.scores => drift.push(ScoreDrift::Mismatch {
                author_id: entry.author_id.clone(),
                list: entry.scores,
                log: *log,
            }),
            Some(_) => {}
        }
    }
    for author_id in latest.keys() {
        if !scores.iter().any(|entry| &entry.author_id == author_id) {
            drift.push(ScoreDrift::MissingFromList {
                author_id: author_id.clone(),
            });
        }
    }
    drift
}

#[cfg(test)]
#[path = "tests/scoring_tests.rs"]
mod tests;
