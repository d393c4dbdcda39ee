// Distance and accuracy evaluation
//
// Per algorithm: compute every pairwise distance over the corpus, scan
// thresholds for the best split between same-set and cross-set pairs, and
// persist the best record.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::constants::{EARLY_STOP_AFTER_THRESHOLD, EARLY_STOP_SCORE, PERFECT_SCORE, SEARCH_FIRST_THRESHOLD};
use crate::db::schema::{self, AccuracyRecord, Hash, Video, VideoDistance, VideoSet};
use crate::error::{Result, VidHashError};
use crate::hashing::HashAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvaluationState {
    Unevaluated,
    DistancesComputed,
    ThresholdSearched,
    Persisted,
}

/// Ground-truth comparisons as (video id, video id) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroundTruth {
    /// Every pair within one set.
    pub positives: Vec<(i64, i64)>,
    /// Every pair across two sets, each cross-set pair once (earlier set first).
    pub negatives: Vec<(i64, i64)>,
}

impl GroundTruth {
    pub fn from_sets(sets: &[VideoSet]) -> Self {
        let ids: Vec<Vec<i64>> = sets
            .iter()
            .map(|s| s.videos().filter_map(|v| v.id).collect())
            .collect();

        let mut truth = GroundTruth::default();
        for (i, members) in ids.iter().enumerate() {
            for (idx, &a) in members.iter().enumerate() {
                truth.positives.extend(members[idx + 1..].iter().map(|&b| (a, b)));
                for later in &ids[i + 1..] {
                    truth.negatives.extend(later.iter().map(|&b| (a, b)));
                }
            }
        }
        truth
    }

    pub fn comparisons(&self) -> usize {
        self.positives.len() + self.negatives.len()
    }
}

/// Classification result at one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdScore {
    pub threshold: u32,
    pub score: f64,
    pub true_positives: i64,
    pub true_negatives: i64,
    pub false_positives: i64,
    pub false_negatives: i64,
}

impl ThresholdScore {
    fn empty(threshold: u32) -> Self {
        Self {
            threshold,
            score: 0.0,
            true_positives: 0,
            true_negatives: 0,
            false_positives: 0,
            false_negatives: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best: ThresholdScore,
    /// Last threshold scored before the scan ended (0 if none was).
    pub last_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub algorithm: String,
    pub record: AccuracyRecord,
    /// The record was already stored and nothing was recomputed.
    pub reused: bool,
    /// The record was written to the store.
    pub persisted: bool,
}

/// Evaluates one algorithm. The distance memo lives and dies with this value.
pub struct Evaluator<'a> {
    conn: &'a Connection,
    algorithm: &'a dyn HashAlgorithm,
    algorithm_id: i64,
    memo: HashMap<(i64, i64, i64), i64>,
    state: EvaluationState,
}

impl<'a> Evaluator<'a> {
    pub fn new(conn: &'a Connection, algorithm: &'a dyn HashAlgorithm) -> Result<Self> {
        let algorithm_id = schema::get_or_create_algorithm(conn, algorithm.name())?;
        Ok(Self {
            conn,
            algorithm,
            algorithm_id,
            memo: HashMap::new(),
            state: EvaluationState::Unevaluated,
        })
    }

    pub fn algorithm_id(&self) -> i64 {
        self.algorithm_id
    }

    pub fn state(&self) -> EvaluationState {
        self.state
    }

    /// Full evaluation. A stored record is returned as-is unless `force`, which
    /// recomputes and overwrites it regardless of score.
    pub fn run(&mut self, force: bool) -> Result<Evaluation> {
        let name = self.algorithm.name().to_string();

        if !force {
            if let Some(record) = schema::best_accuracy(self.conn, self.algorithm_id)? {
                log::info!("{} accuracy (stored): {:.4}", name, record.accuracy);
                self.state = EvaluationState::Persisted;
                return Ok(Evaluation { algorithm: name, record, reused: true, persisted: false });
            }
        }

        let pairs = self.compute_distances()?;
        log::debug!("{}: recorded {} distances", name, pairs);

        let outcome = self.search()?;
        let record = self.to_record(&outcome.best);
        log::info!(
            "{} accuracy: {:.4} at threshold {} (TP {}, TN {}, FP {}, FN {})",
            name,
            record.accuracy,
            outcome.best.threshold,
            record.true_positives,
            record.true_negatives,
            record.false_positives,
            record.false_negatives
        );

        let persisted = schema::record_accuracy(self.conn, self.algorithm_id, &record, force)?;
        self.state = EvaluationState::Persisted;
        Ok(Evaluation { algorithm: name, record, reused: false, persisted })
    }

    /// Compute and store the distance of every unordered pair of stored videos.
    /// Returns the number of pairs.
    pub fn compute_distances(&mut self) -> Result<usize> {
        let videos = schema::all_videos(self.conn)?;
        let mut count = 0;

        for (idx, a) in videos.iter().enumerate() {
            for b in &videos[idx + 1..] {
                let distance = self.fingerprint_distance(a, b)?;
                schema::record_distance(self.conn, &distance)?;
                count += 1;
            }
        }

        self.state = EvaluationState::DistancesComputed;
        Ok(count)
    }

    fn fingerprint<'v>(&self, video: &'v Video) -> Result<&'v Hash> {
        let name = self.algorithm.name();
        video.fingerprint(name).ok_or_else(|| {
            VidHashError::Precondition(format!("video {} was never hashed with {}", video.file_name(), name))
        })
    }

    fn fingerprint_distance(&self, a: &Video, b: &Video) -> Result<VideoDistance> {
        let stored_id = |v: &Video| {
            v.id.ok_or_else(|| VidHashError::Precondition(format!("video {} has no id", v.file_name())))
        };

        let distance = self.algorithm.compute_distance(self.fingerprint(a)?, self.fingerprint(b)?)?;
        Ok(VideoDistance {
            a: stored_id(a)?,
            b: stored_id(b)?,
            algorithm_id: self.algorithm_id,
            distance,
        })
    }

    /// Scan thresholds `1..max_threshold` for the best score.
    ///
    /// Stops at a perfect score, or once past threshold 10 when the score is
    /// below 0.6 and not above the previous threshold's score.
    pub fn search(&mut self) -> Result<SearchOutcome> {
        let truth = GroundTruth::from_sets(&schema::all_sets(self.conn)?);
        let max = self.algorithm.max_threshold();

        let mut best = ThresholdScore::empty(SEARCH_FIRST_THRESHOLD);
        let mut score = 0.0;
        let mut last_threshold = 0;

        for threshold in SEARCH_FIRST_THRESHOLD..max {
            let last_score = score;
            let current = self.score_at(&truth, threshold)?;
            score = current.score;
            last_threshold = threshold;

            if score > best.score {
                best = current;
            }
            // Non-increasing, not strictly lower: a flat curve below 0.6 must end the
            // scan, at the cost of missing a rise that follows a plateau past 10.
            if score < EARLY_STOP_SCORE && threshold > EARLY_STOP_AFTER_THRESHOLD && score <= last_score {
                log::debug!("{}: early stop at threshold {}", self.algorithm.name(), threshold);
                break;
            }
            if score >= PERFECT_SCORE {
                break;
            }
        }

        self.state = EvaluationState::ThresholdSearched;
        Ok(SearchOutcome { best, last_threshold })
    }

    /// Score one threshold against the stored sets.
    pub fn accuracy(&mut self, threshold: u32) -> Result<ThresholdScore> {
        let truth = GroundTruth::from_sets(&schema::all_sets(self.conn)?);
        self.score_at(&truth, threshold)
    }

    fn score_at(&mut self, truth: &GroundTruth, threshold: u32) -> Result<ThresholdScore> {
        let mut result = ThresholdScore::empty(threshold);
        let limit = i64::from(threshold);

        for &(a, b) in &truth.positives {
            if self.distance(a, b)?.abs() < limit {
                result.true_positives += 1;
            } else {
                result.false_negatives += 1;
            }
        }
        for &(a, b) in &truth.negatives {
            if self.distance(a, b)?.abs() < limit {
                result.false_positives += 1;
            } else {
                result.true_negatives += 1;
            }
        }

        let total = truth.comparisons();
        if total > 0 {
            result.score = (result.true_positives + result.true_negatives) as f64 / total as f64;
        }
        Ok(result)
    }

    /// Stored distance for a pair, memoised per (algorithm, pair).
    fn distance(&mut self, a: i64, b: i64) -> Result<i64> {
        let key = (self.algorithm_id, a.min(b), a.max(b));
        if let Some(&d) = self.memo.get(&key) {
            return Ok(d);
        }

        let stored = schema::lookup_distance(self.conn, self.algorithm_id, a, b)?.ok_or_else(|| {
            VidHashError::Precondition(format!(
                "no distance between videos {} and {} for {}",
                a,
                b,
                self.algorithm.name()
            ))
        })?;
        self.memo.insert(key, stored.distance);
        Ok(stored.distance)
    }

    fn to_record(&self, best: &ThresholdScore) -> AccuracyRecord {
        let max = self.algorithm.max_threshold().max(1);
        AccuracyRecord {
            accuracy: best.score,
            threshold: f64::from(best.threshold) / f64::from(max),
            true_positives: best.true_positives,
            true_negatives: best.true_negatives,
            false_positives: best.false_positives,
            false_negatives: best.false_negatives,
        }
    }
}

/// Evaluate each algorithm in turn with a fresh evaluator.
pub fn evaluate_all(conn: &Connection, algorithms: &[&dyn HashAlgorithm], force: bool) -> Result<Vec<Evaluation>> {
    let mut results = Vec::with_capacity(algorithms.len());
    for &algorithm in algorithms {
        log::info!("Running accuracy for {}", algorithm.name());
        let mut evaluator = Evaluator::new(conn, algorithm)?;
        results.push(evaluator.run(force)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use std::path::Path;

    /// Distance is the absolute difference of integer fingerprints.
    struct Difference;

    impl HashAlgorithm for Difference {
        fn name(&self) -> &str {
            "difference"
        }
        fn max_threshold(&self) -> u32 {
            10
        }
        fn compute_distance(&self, a: &Hash, b: &Hash) -> Result<i64> {
            let a: i64 = a.value.parse().unwrap();
            let b: i64 = b.value.parse().unwrap();
            Ok((a - b).abs())
        }
        fn hash_video(&self, _path: &Path) -> Result<String> {
            Ok("0".into())
        }
    }

    fn stored(conn: &Connection, name: &str, value: i64) -> Video {
        schema::add_video(conn, &Video::new(name, "mp4").with_hash(Hash::new("difference", value.to_string())))
            .unwrap()
    }

    #[test]
    fn test_ground_truth_counts() {
        let conn = open_in_memory().unwrap();
        let vs: Vec<Video> = (0..5).map(|i| stored(&conn, &format!("v{}", i), i)).collect();
        let s1 = schema::add_to_set(&conn, &vs[0], None).unwrap();
        schema::add_to_set(&conn, &vs[1], Some(&s1)).unwrap();
        let s2 = schema::add_to_set(&conn, &vs[2], None).unwrap();
        let s2 = schema::add_to_set(&conn, &vs[3], Some(&s2)).unwrap();
        schema::add_to_set(&conn, &vs[4], Some(&s2)).unwrap();

        let truth = GroundTruth::from_sets(&schema::all_sets(&conn).unwrap());
        // 1 + 3 intra-set pairs, 2 * 3 cross-set pairs counted once
        assert_eq!(truth.positives.len(), 4);
        assert_eq!(truth.negatives.len(), 6);
    }

    #[test]
    fn test_empty_corpus_scores_zero() {
        let conn = open_in_memory().unwrap();
        let alg = Difference;
        let mut ev = Evaluator::new(&conn, &alg).unwrap();
        let result = ev.run(false).unwrap();
        assert_eq!(result.record.accuracy, 0.0);
        assert_eq!(result.record.threshold, 0.1);
        assert_eq!(ev.state(), EvaluationState::Persisted);
    }

    #[test]
    fn test_missing_fingerprint_is_precondition_error() {
        let conn = open_in_memory().unwrap();
        stored(&conn, "a", 1);
        schema::add_video(&conn, &Video::new("b", "mp4")).unwrap();

        let alg = Difference;
        let mut ev = Evaluator::new(&conn, &alg).unwrap();
        assert!(matches!(ev.compute_distances(), Err(VidHashError::Precondition(_))));
    }

    #[test]
    fn test_distance_lookups_are_memoised() {
        let conn = open_in_memory().unwrap();
        let a = stored(&conn, "a", 1);
        let b = stored(&conn, "b", 4);
        let s = schema::add_to_set(&conn, &a, None).unwrap();
        schema::add_to_set(&conn, &b, Some(&s)).unwrap();

        let alg = Difference;
        let mut ev = Evaluator::new(&conn, &alg).unwrap();
        assert_eq!(ev.compute_distances().unwrap(), 1);
        assert_eq!(ev.state(), EvaluationState::DistancesComputed);
        assert_eq!(ev.accuracy(5).unwrap().true_positives, 1);

        conn.execute("DELETE FROM video_distances", []).unwrap();
        assert_eq!(ev.accuracy(2).unwrap().false_negatives, 1);

        // A fresh evaluator has its own memo and sees the missing row
        let mut fresh = Evaluator::new(&conn, &alg).unwrap();
        assert!(matches!(fresh.accuracy(2), Err(VidHashError::Precondition(_))));
    }

    #[test]
    fn test_stored_record_short_circuits() {
        let conn = open_in_memory().unwrap();
        let alg = Difference;
        let id = schema::get_or_create_algorithm(&conn, "difference").unwrap();
        let record = AccuracyRecord {
            accuracy: 0.75,
            threshold: 0.3,
            true_positives: 3,
            true_negatives: 0,
            false_positives: 1,
            false_negatives: 0,
        };
        schema::record_accuracy(&conn, id, &record, false).unwrap();

        // A video without a fingerprint would fail a real evaluation
        schema::add_video(&conn, &Video::new("unhashed", "mp4")).unwrap();
        schema::add_video(&conn, &Video::new("unhashed2", "mp4")).unwrap();

        let mut ev = Evaluator::new(&conn, &alg).unwrap();
        let result = ev.run(false).unwrap();
        assert!(result.reused);
        assert_eq!(result.record, record);

        assert!(ev.run(true).is_err());
    }

    #[test]
    fn test_force_overwrites_better_record() {
        let conn = open_in_memory().unwrap();
        let a = stored(&conn, "a", 0);
        let b = stored(&conn, "b", 9);
        let s = schema::add_to_set(&conn, &a, None).unwrap();
        schema::add_to_set(&conn, &b, Some(&s)).unwrap();

        let alg = Difference;
        let id = schema::get_or_create_algorithm(&conn, "difference").unwrap();
        let perfect = AccuracyRecord {
            accuracy: 1.0,
            threshold: 0.1,
            true_positives: 1,
            true_negatives: 0,
            false_positives: 0,
            false_negatives: 0,
        };
        schema::record_accuracy(&conn, id, &perfect, false).unwrap();

        let mut ev = Evaluator::new(&conn, &alg).unwrap();
        let result = ev.run(true).unwrap();
        assert!(!result.reused);
        assert!(result.persisted);
        assert_eq!(result.record.accuracy, 0.0);
        assert_eq!(schema::best_accuracy(&conn, id).unwrap().unwrap().accuracy, 0.0);
    }
}
