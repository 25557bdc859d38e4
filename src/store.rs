//! Detection event store and timeline index.
//!
//! The store is append-only and date-indexed. In-memory state is
//! authoritative: the JSON document on disk is a best-effort mirror, and a
//! failed flush never loses events that are already in memory. Loading is
//! tolerant of a missing or partially corrupt document; well-formed entries
//! survive a bad neighbor.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local, NaiveDate, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PipelineError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Utc>,
    pub frame_index: u64,
    /// Count of detections per label on this frame.
    pub label_counts: BTreeMap<String, u32>,
}

impl DetectionEvent {
    pub fn detection_count(&self) -> u32 {
        self.label_counts.values().sum()
    }
}

pub struct EventStore {
    path: PathBuf,
    events: Vec<DetectionEvent>,
    /// Most recent background flush, joined before any synchronous save so
    /// an older snapshot can never land after a newer document.
    flush: Option<JoinHandle<()>>,
}

impl EventStore {
    /// Open the store at `path`, loading whatever valid events the document
    /// holds. A missing file is an empty store; malformed entries are skipped
    /// with a warning rather than failing the open.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let mut store = Self {
            path: path.to_path_buf(),
            events: Vec::new(),
            flush: None,
        };
        match fs::read_to_string(path) {
            Ok(text) => store.load_document(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PipelineError::Persistence(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        }
        Ok(store)
    }

    fn load_document(&mut self, text: &str) {
        let doc: Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("{}: unreadable event document: {}", self.path.display(), e);
                return;
            }
        };
        let Some(entries) = doc.get("events").and_then(Value::as_array) else {
            warn!("{}: document has no events array", self.path.display());
            return;
        };
        for (i, entry) in entries.iter().enumerate() {
            match serde_json::from_value::<DetectionEvent>(entry.clone()) {
                Ok(event) => self.events.push(event),
                Err(e) => warn!("{}: skipping event {}: {}", self.path.display(), i, e),
            }
        }
        self.events.sort_by_key(|e| (e.timestamp, e.frame_index));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    pub fn append(&mut self, event: DetectionEvent) {
        self.events.push(event);
    }

    /// First stored event for `frame_index`, if any. Playback uses this to
    /// replay the stored verdict for a known detection frame.
    pub fn event_for_frame(&self, frame_index: u64) -> Option<&DetectionEvent> {
        self.events.iter().find(|e| e.frame_index == frame_index)
    }

    /// Events whose timestamp falls on `date` (UTC), in timestamp order.
    pub fn query_by_date(&self, date: NaiveDate) -> Vec<DetectionEvent> {
        let mut out: Vec<DetectionEvent> = self
            .events
            .iter()
            .filter(|e| e.timestamp.date_naive() == date)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.timestamp, e.frame_index));
        out
    }

    /// Distinct dates (UTC) that have at least one event.
    pub fn detection_dates(&self) -> BTreeSet<NaiveDate> {
        self.events.iter().map(|e| e.timestamp.date_naive()).collect()
    }

    /// Write the full document to disk. Joins any in-flight background flush
    /// first, so the document on disk after this call is this snapshot.
    pub fn save(&mut self) -> Result<(), PipelineError> {
        self.join_flush();
        write_document(&self.path, &self.events)
    }

    /// Flush a snapshot on a background thread so the tick loop never blocks
    /// on disk. If the previous flush is still running the call is a no-op;
    /// the next cadence point picks the events up. A failed flush is logged;
    /// in-memory events are still intact.
    pub fn save_in_background(&mut self) {
        if let Some(handle) = &self.flush {
            if !handle.is_finished() {
                return;
            }
        }
        self.join_flush();
        let path = self.path.clone();
        let events = self.events.clone();
        self.flush = Some(thread::spawn(move || {
            if let Err(e) = write_document(&path, &events) {
                warn!("background flush failed: {}", e);
            }
        }));
    }

    fn join_flush(&mut self) {
        if let Some(handle) = self.flush.take() {
            if handle.join().is_err() {
                warn!("background flush thread panicked");
            }
        }
    }

    /// Export a session report next to the recordings. The file name carries
    /// a timestamp and a counter suffix if needed, so an export never
    /// overwrites an earlier one.
    pub fn export_report(
        &self,
        dir: &Path,
        session_start: DateTime<Utc>,
    ) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(dir)
            .map_err(|e| PipelineError::Persistence(format!("{}: {}", dir.display(), e)))?;

        let detections: Vec<Value> = self
            .events
            .iter()
            .map(|e| {
                let offset = (e.timestamp - session_start).num_seconds().max(0);
                json!({
                    "timestamp": e.timestamp,
                    "frame_index": e.frame_index,
                    "time_str": format!(
                        "{}:{:02}:{:02}",
                        offset / 3600,
                        (offset % 3600) / 60,
                        offset % 60
                    ),
                })
            })
            .collect();
        let report = json!({
            "session_start": session_start,
            "detection_count": self.events.len(),
            "detections": detections,
        });

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut path = dir.join(format!("detection_report_{}.json", stamp));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("detection_report_{}_{}.json", stamp, n));
            n += 1;
        }
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        fs::write(&path, text)
            .map_err(|e| PipelineError::Persistence(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        self.join_flush();
    }
}

/// Serialize the document to a sibling temp file and rename it into place,
/// so readers never see a torn write.
fn write_document(path: &Path, events: &[DetectionEvent]) -> Result<(), PipelineError> {
    let doc = json!({
        "version": 1,
        "events": events,
        "last_updated": Utc::now(),
    });
    let text =
        serde_json::to_string_pretty(&doc).map_err(|e| PipelineError::Persistence(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text)
        .map_err(|e| PipelineError::Persistence(format!("{}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| PipelineError::Persistence(format!("{}: {}", path.display(), e)))
}

/// Sorted, deduplicated frame indices with detections, scoped to the
/// currently open clip. Drives seek-to-detection navigation.
#[derive(Debug, Default)]
pub struct TimelineIndex {
    indices: Vec<u64>,
}

impl TimelineIndex {
    /// Rebuild from store events, keeping only indices addressable in a clip
    /// of `frame_count` frames.
    pub fn rebuild(events: &[DetectionEvent], frame_count: u64) -> Self {
        let mut index = Self::default();
        for event in events {
            if event.frame_index < frame_count {
                index.insert(event.frame_index);
            }
        }
        index
    }

    pub fn insert(&mut self, frame_index: u64) {
        if let Err(pos) = self.indices.binary_search(&frame_index) {
            self.indices.insert(pos, frame_index);
        }
    }

    pub fn contains(&self, frame_index: u64) -> bool {
        self.indices.binary_search(&frame_index).is_ok()
    }

    /// First detection frame strictly after `frame_index`.
    pub fn next_after(&self, frame_index: u64) -> Option<u64> {
        let pos = self.indices.partition_point(|&i| i <= frame_index);
        self.indices.get(pos).copied()
    }

    /// Last detection frame strictly before `frame_index`.
    pub fn prev_before(&self, frame_index: u64) -> Option<u64> {
        let pos = self.indices.partition_point(|&i| i < frame_index);
        pos.checked_sub(1).and_then(|p| self.indices.get(p)).copied()
    }

    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(ts: DateTime<Utc>, frame_index: u64) -> DetectionEvent {
        let mut label_counts = BTreeMap::new();
        label_counts.insert("motion".to_string(), 1);
        DetectionEvent {
            timestamp: ts,
            frame_index,
            label_counts,
        }
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&dir.path().join("detections.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        let mut store = EventStore::open(&path).unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        store.append(event(ts, 7));
        store.append(event(ts + chrono::Duration::seconds(5), 19));
        store.save().unwrap();

        let reloaded = EventStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.events()[0].frame_index, 7);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        fs::write(
            &path,
            r#"{"version":1,"events":[
                {"timestamp":"2026-08-20T12:00:00Z","frame_index":3,"label_counts":{"motion":1}},
                {"timestamp":"not a time","frame_index":4},
                {"frame_index":5}
            ],"last_updated":"2026-08-20T12:00:05Z"}"#,
        )
        .unwrap();
        let store = EventStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.events()[0].frame_index, 3);
    }

    #[test]
    fn garbage_document_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        fs::write(&path, "not json at all").unwrap();
        let store = EventStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn final_save_supersedes_inflight_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        let mut store = EventStore::open(&path).unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        store.append(event(ts, 1));
        store.save_in_background();
        store.append(event(ts, 2));
        // save() joins the flush, so the older one-event snapshot can never
        // land after this two-event document.
        store.save().unwrap();

        let reloaded = EventStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn events_are_found_by_frame_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(&dir.path().join("d.json")).unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        store.append(event(ts, 10));
        store.append(event(ts, 40));
        assert_eq!(store.event_for_frame(40).unwrap().frame_index, 40);
        assert!(store.event_for_frame(7).is_none());
    }

    #[test]
    fn date_queries_group_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(&dir.path().join("d.json")).unwrap();
        let day1 = Utc.with_ymd_and_hms(2026, 8, 20, 23, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 8, 21, 1, 0, 0).unwrap();
        store.append(event(day2, 50));
        store.append(event(day1, 10));
        store.append(event(day1 + chrono::Duration::minutes(5), 20));

        let dates = store.detection_dates();
        assert_eq!(dates.len(), 2);
        let on_day1 = store.query_by_date(day1.date_naive());
        assert_eq!(on_day1.len(), 2);
        assert!(on_day1[0].timestamp < on_day1[1].timestamp);
        assert!(store.query_by_date(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()).is_empty());
    }

    #[test]
    fn export_report_formats_offsets_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(&dir.path().join("d.json")).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        store.append(event(start + chrono::Duration::seconds(3725), 99));

        let first = store.export_report(dir.path(), start).unwrap();
        let second = store.export_report(dir.path(), start).unwrap();
        assert_ne!(first, second);

        let doc: Value = serde_json::from_str(&fs::read_to_string(&first).unwrap()).unwrap();
        assert_eq!(doc["detection_count"], 1);
        assert_eq!(doc["detections"][0]["time_str"], "1:02:05");
        assert_eq!(doc["detections"][0]["frame_index"], 99);
    }

    #[test]
    fn timeline_orders_dedupes_and_scopes() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        let events = vec![event(ts, 40), event(ts, 10), event(ts, 40), event(ts, 500)];
        let timeline = TimelineIndex::rebuild(&events, 100);
        assert_eq!(timeline.indices(), &[10, 40]);
        assert!(timeline.contains(40));
        assert!(!timeline.contains(500));
        assert_eq!(timeline.next_after(10), Some(40));
        assert_eq!(timeline.next_after(40), None);
        assert_eq!(timeline.prev_before(40), Some(10));
        assert_eq!(timeline.prev_before(10), None);
    }
}
