// Database schema types and query helpers

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VidHashError};

// ----- Hash -----

/// A fingerprint of one video under one algorithm.
///
/// `Hash` deliberately has no `PartialEq`: comparing against another stored
/// record (`equals_record`, algorithm name + value) and comparing against a
/// freshly computed value (`equals_value`, value only) are different questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hash {
    pub algorithm: String,
    pub value: String,
    pub algorithm_id: Option<i64>,
    pub row_id: Option<i64>,
}

impl Hash {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value: value.into(),
            algorithm_id: None,
            row_id: None,
        }
    }

    /// Record comparison: algorithm name and value, ids ignored.
    pub fn equals_record(&self, other: &Hash) -> bool {
        self.algorithm == other.algorithm && self.value == other.value
    }

    /// Bare value comparison.
    pub fn equals_value(&self, value: &str) -> bool {
        self.value == value
    }
}

// ----- Video -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: Option<i64>,
    pub name: String,
    pub format: String,
    pub hash_values: BTreeMap<String, Hash>,
}

impl Video {
    pub fn new(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            format: format.into(),
            hash_values: BTreeMap::new(),
        }
    }

    /// Split a media path into (name, format): file stem and extension without the dot.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_stem()?.to_str()?;
        let format = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Some(Self::new(name, format))
    }

    pub fn with_hash(mut self, hash: Hash) -> Self {
        self.hash_values.insert(hash.algorithm.clone(), hash);
        self
    }

    pub fn fingerprint(&self, algorithm: &str) -> Option<&Hash> {
        self.hash_values.get(algorithm)
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.format)
    }

    /// Lexicographic order by (name, format).
    pub fn cmp_name_format(&self, other: &Self) -> Ordering {
        (self.name.as_str(), self.format.as_str()).cmp(&(other.name.as_str(), other.format.as_str()))
    }
}

impl PartialEq for Video {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.format == other.format
            && self.hash_values.len() == other.hash_values.len()
            && self.hash_values.iter().all(|(alg, h)| {
                other
                    .hash_values
                    .get(alg)
                    .map(|o| h.equals_record(o))
                    .unwrap_or(false)
            })
    }
}

impl Eq for Video {}

// ----- VideoDistance -----

/// Distance between two stored videos under one algorithm. The pair is unordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDistance {
    pub a: i64,
    pub b: i64,
    pub algorithm_id: i64,
    pub distance: i64,
}

// ----- VideoSet -----

/// Ground-truth group of videos showing the same content. Members are keyed by video id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSet {
    pub id: i64,
    pub members: BTreeMap<i64, Video>,
}

impl VideoSet {
    pub fn videos(&self) -> impl Iterator<Item = &Video> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, video: &Video) -> bool {
        video.id.map(|id| self.members.contains_key(&id)).unwrap_or(false)
    }
}

// ----- Accuracy -----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub accuracy: f64,
    /// Best threshold divided by the algorithm's maximum threshold.
    pub threshold: f64,
    pub true_positives: i64,
    pub true_negatives: i64,
    pub false_positives: i64,
    pub false_negatives: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmRow {
    pub id: i64,
    pub name: String,
    pub best: Option<AccuracyRecord>,
}

// ----- Algorithms -----

pub fn get_or_create_algorithm(conn: &Connection, name: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM hash_methods WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute("INSERT INTO hash_methods (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

pub fn algorithm_name(conn: &Connection, id: i64) -> Result<Option<String>> {
    let name = conn
        .query_row(
            "SELECT name FROM hash_methods WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

pub fn list_algorithms(conn: &Connection) -> Result<Vec<AlgorithmRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, accuracy, threshold, true_positives, true_negatives,
                false_positives, false_negatives
         FROM hash_methods ORDER BY name",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(AlgorithmRow {
                id: row.get(0)?,
                name: row.get(1)?,
                best: accuracy_from_row(row, 2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ----- Fingerprints -----

pub fn fingerprints_of(conn: &Connection, video_id: i64) -> Result<BTreeMap<String, Hash>> {
    let mut stmt = conn.prepare(
        "SELECT h.name, ch.hash_value, h.id, ch.id
         FROM computed_hashes ch
         INNER JOIN hash_methods h ON ch.hash_method_id = h.id
         WHERE ch.video_id = ?1",
    )?;

    let hashes = stmt
        .query_map(params![video_id], |row| {
            Ok(Hash {
                algorithm: row.get(0)?,
                value: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                algorithm_id: Some(row.get(2)?),
                row_id: Some(row.get(3)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(hashes.into_iter().map(|h| (h.algorithm.clone(), h)).collect())
}

enum FingerprintChange<'a> {
    Insert(&'a Hash),
    Update(&'a Hash),
}

/// Minimal set of writes turning `previous` into `desired`. Algorithms only
/// present in `previous` are left alone.
fn fingerprint_delta<'a>(
    desired: &'a BTreeMap<String, Hash>,
    previous: &BTreeMap<String, Hash>,
) -> Vec<FingerprintChange<'a>> {
    desired
        .iter()
        .filter_map(|(alg, hash)| match previous.get(alg) {
            None => Some(FingerprintChange::Insert(hash)),
            Some(old) if !hash.equals_record(old) => Some(FingerprintChange::Update(hash)),
            Some(_) => None,
        })
        .collect()
}

fn apply_fingerprint_change(conn: &Connection, video_id: i64, change: &FingerprintChange) -> Result<()> {
    let hash = match change {
        FingerprintChange::Insert(h) | FingerprintChange::Update(h) => h,
    };
    let algorithm_id = match hash.algorithm_id {
        Some(id) => id,
        None => get_or_create_algorithm(conn, &hash.algorithm)?,
    };

    match change {
        FingerprintChange::Insert(_) => {
            conn.execute(
                "INSERT INTO computed_hashes (video_id, hash_method_id, hash_value) VALUES (?1, ?2, ?3)",
                params![video_id, algorithm_id, hash.value],
            )?;
        }
        FingerprintChange::Update(_) => {
            conn.execute(
                "UPDATE computed_hashes SET hash_value = ?1 WHERE hash_method_id = ?2 AND video_id = ?3",
                params![hash.value, algorithm_id, video_id],
            )?;
        }
    }
    Ok(())
}

/// Apply the difference between `video.hash_values` and the last persisted
/// snapshot atomically, then return a fresh snapshot of the stored row.
pub fn upsert_fingerprints(conn: &Connection, video: &Video, previous: Option<&Video>) -> Result<Video> {
    let video_id = video.id.ok_or_else(|| {
        VidHashError::Precondition(format!(
            "video {} must be stored before fingerprints can be attached",
            video.file_name()
        ))
    })?;

    let empty = BTreeMap::new();
    let previous_hashes = previous.map(|v| &v.hash_values).unwrap_or(&empty);
    let changes = fingerprint_delta(&video.hash_values, previous_hashes);

    if !changes.is_empty() {
        let tx = conn.unchecked_transaction()?;
        for change in &changes {
            apply_fingerprint_change(&tx, video_id, change)?;
        }
        tx.commit()?;
    }

    Ok(Video {
        id: Some(video_id),
        name: video.name.clone(),
        format: video.format.clone(),
        hash_values: fingerprints_of(conn, video_id)?,
    })
}

/// Persist a video's fingerprints, inserting the video first when it has no id.
pub fn attach_fingerprints(conn: &Connection, video: &Video) -> Result<Video> {
    match video.id {
        None => add_video(conn, video),
        Some(id) => {
            let previous = get_video(conn, id)?;
            upsert_fingerprints(conn, video, previous.as_ref())
        }
    }
}

// ----- Videos -----

fn video_columns(row: &Row) -> rusqlite::Result<(i64, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn hydrate(conn: &Connection, (id, name, format): (i64, String, String)) -> Result<Video> {
    Ok(Video {
        id: Some(id),
        name,
        format,
        hash_values: fingerprints_of(conn, id)?,
    })
}

pub fn get_video(conn: &Connection, id: i64) -> Result<Option<Video>> {
    let cols = conn
        .query_row(
            "SELECT id, video_name, format FROM video_info WHERE id = ?1",
            params![id],
            video_columns,
        )
        .optional()?;

    cols.map(|c| hydrate(conn, c)).transpose()
}

/// Exact lookup by name; `format = None` matches every format sharing the name.
pub fn find_video(conn: &Connection, name: &str, format: Option<&str>) -> Result<Vec<Video>> {
    let rows = match format {
        Some(fmt) => {
            let mut stmt = conn.prepare(
                "SELECT id, video_name, format FROM video_info
                 WHERE video_name = ?1 AND format = ?2 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![name, fmt], video_columns)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, video_name, format FROM video_info WHERE video_name = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![name], video_columns)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    rows.into_iter().map(|c| hydrate(conn, c)).collect()
}

pub fn find_video_by_name_and_format(conn: &Connection, name: &str, format: &str) -> Result<Option<Video>> {
    Ok(find_video(conn, name, Some(format))?.into_iter().next())
}

/// Insert a video and any fingerprints it carries. A duplicate (name, format)
/// fails with a constraint error.
pub fn add_video(conn: &Connection, video: &Video) -> Result<Video> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO video_info (video_name, format) VALUES (?1, ?2)",
        params![video.name, video.format],
    )?;
    let id = tx.last_insert_rowid();

    for change in fingerprint_delta(&video.hash_values, &BTreeMap::new()) {
        apply_fingerprint_change(&tx, id, &change)?;
    }
    tx.commit()?;

    get_video(conn, id)?
        .ok_or_else(|| VidHashError::Precondition(format!("video {} vanished after insert", id)))
}

pub fn add_video_if_new(conn: &Connection, video: &Video) -> Result<Video> {
    if let Some(existing) = find_video_by_name_and_format(conn, &video.name, &video.format)? {
        return Ok(existing);
    }
    add_video(conn, video)
}

/// Every stored video in storage order.
pub fn all_videos(conn: &Connection) -> Result<Vec<Video>> {
    let mut stmt = conn.prepare("SELECT id, video_name, format FROM video_info ORDER BY id")?;
    let rows = stmt
        .query_map([], video_columns)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(|c| hydrate(conn, c)).collect()
}

fn resolve_video_id(conn: &Connection, video: &Video) -> Result<Option<i64>> {
    if video.id.is_some() {
        return Ok(video.id);
    }
    Ok(find_video_by_name_and_format(conn, &video.name, &video.format)?.and_then(|v| v.id))
}

// ----- Distances -----

/// Replace the stored distance for this pair and algorithm, in either orientation.
pub fn record_distance(conn: &Connection, distance: &VideoDistance) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM video_distances
         WHERE method = ?3 AND ((a = ?1 AND b = ?2) OR (a = ?2 AND b = ?1))",
        params![distance.a, distance.b, distance.algorithm_id],
    )?;
    tx.execute(
        "INSERT INTO video_distances (a, b, method, distance) VALUES (?1, ?2, ?3, ?4)",
        params![distance.a, distance.b, distance.algorithm_id, distance.distance],
    )?;
    tx.commit()?;
    Ok(())
}

/// Look up a distance, probing (v1, v2) then (v2, v1). The returned pair keeps
/// the orientation it was stored in.
pub fn lookup_distance(conn: &Connection, algorithm_id: i64, v1: i64, v2: i64) -> Result<Option<VideoDistance>> {
    let sql = "SELECT distance FROM video_distances WHERE a = ?1 AND b = ?2 AND method = ?3";

    for (a, b) in [(v1, v2), (v2, v1)] {
        let found: Option<i64> = conn
            .query_row(sql, params![a, b, algorithm_id], |row| row.get(0))
            .optional()?;
        if let Some(distance) = found {
            return Ok(Some(VideoDistance { a, b, algorithm_id, distance }));
        }
    }

    Ok(None)
}

// ----- Sets -----

pub fn get_set(conn: &Connection, set_id: i64) -> Result<Option<VideoSet>> {
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM video_sets WHERE id = ?1", params![set_id], |row| row.get(0))
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT v.id, v.video_name, v.format
         FROM video_set_memberships sm
         INNER JOIN video_info v ON v.id = sm.video_id
         WHERE sm.set_id = ?1
         ORDER BY v.id",
    )?;
    let rows = stmt
        .query_map(params![set_id], video_columns)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut members = BTreeMap::new();
    for cols in rows {
        let video = hydrate(conn, cols)?;
        if let Some(id) = video.id {
            members.insert(id, video);
        }
    }

    Ok(Some(VideoSet { id: set_id, members }))
}

/// The set a video belongs to, if any.
pub fn set_for(conn: &Connection, video: &Video) -> Result<Option<VideoSet>> {
    let Some(video_id) = resolve_video_id(conn, video)? else {
        return Ok(None);
    };

    let set_id: Option<i64> = conn
        .query_row(
            "SELECT set_id FROM video_set_memberships WHERE video_id = ?1 ORDER BY set_id LIMIT 1",
            params![video_id],
            |row| row.get(0),
        )
        .optional()?;

    match set_id {
        Some(id) => get_set(conn, id),
        None => Ok(None),
    }
}

/// Every set in storage order.
pub fn all_sets(conn: &Connection) -> Result<Vec<VideoSet>> {
    let mut stmt = conn.prepare("SELECT id FROM video_sets ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut sets = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(set) = get_set(conn, id)? {
            sets.push(set);
        }
    }
    Ok(sets)
}

pub fn create_set(conn: &Connection) -> Result<VideoSet> {
    conn.execute("INSERT INTO video_sets (number_of_videos) VALUES (0)", [])?;
    Ok(VideoSet {
        id: conn.last_insert_rowid(),
        members: BTreeMap::new(),
    })
}

/// Add a video to `set`, or to the video's existing set, or to a new set.
/// Adding a current member returns the set unchanged.
pub fn add_to_set(conn: &Connection, video: &Video, set: Option<&VideoSet>) -> Result<VideoSet> {
    let video = match video.id {
        Some(_) => video.clone(),
        None => add_video_if_new(conn, video)?,
    };
    let video_id = video.id.ok_or_else(|| {
        VidHashError::Precondition(format!("video {} has no id", video.file_name()))
    })?;

    let existing = match set {
        Some(s) => Some(s.clone()),
        None => set_for(conn, &video)?,
    };

    if let Some(ref s) = existing {
        if s.contains(&video) {
            return Ok(s.clone());
        }
    }

    let tx = conn.unchecked_transaction()?;
    let mut target = match existing {
        Some(s) => s,
        None => create_set(&tx)?,
    };
    tx.execute(
        "INSERT INTO video_set_memberships (set_id, video_id) VALUES (?1, ?2)",
        params![target.id, video_id],
    )?;
    tx.commit()?;

    target.members.insert(video_id, video);
    Ok(target)
}

// ----- Accuracy -----

fn accuracy_from_row(row: &Row, offset: usize) -> rusqlite::Result<Option<AccuracyRecord>> {
    let accuracy: Option<f64> = row.get(offset)?;
    let Some(accuracy) = accuracy else {
        return Ok(None);
    };
    Ok(Some(AccuracyRecord {
        accuracy,
        threshold: row.get::<_, Option<f64>>(offset + 1)?.unwrap_or(0.0),
        true_positives: row.get::<_, Option<i64>>(offset + 2)?.unwrap_or(0),
        true_negatives: row.get::<_, Option<i64>>(offset + 3)?.unwrap_or(0),
        false_positives: row.get::<_, Option<i64>>(offset + 4)?.unwrap_or(0),
        false_negatives: row.get::<_, Option<i64>>(offset + 5)?.unwrap_or(0),
    }))
}

/// Best stored accuracy for an algorithm; `None` until it has been evaluated.
pub fn best_accuracy(conn: &Connection, algorithm_id: i64) -> Result<Option<AccuracyRecord>> {
    let record = conn
        .query_row(
            "SELECT accuracy, threshold, true_positives, true_negatives,
                    false_positives, false_negatives
             FROM hash_methods WHERE id = ?1",
            params![algorithm_id],
            |row| accuracy_from_row(row, 0),
        )
        .optional()?;
    Ok(record.flatten())
}

/// Store `record` if it beats the stored accuracy (or `force`). Returns whether it was written.
pub fn record_accuracy(conn: &Connection, algorithm_id: i64, record: &AccuracyRecord, force: bool) -> Result<bool> {
    if !force {
        if let Some(best) = best_accuracy(conn, algorithm_id)? {
            if best.accuracy >= record.accuracy {
                return Ok(false);
            }
        }
    }

    let updated = conn.execute(
        "UPDATE hash_methods
         SET accuracy = ?1, threshold = ?2, true_positives = ?3, true_negatives = ?4,
             false_positives = ?5, false_negatives = ?6
         WHERE id = ?7",
        params![
            record.accuracy,
            record.threshold,
            record.true_positives,
            record.true_negatives,
            record.false_positives,
            record.false_negatives,
            algorithm_id,
        ],
    )?;

    if updated == 0 {
        return Err(VidHashError::Precondition(format!("no hash method with id {}", algorithm_id)));
    }
    Ok(true)
}
