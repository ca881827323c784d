//! Upload-scoped visibility and the latest-event-per-key dashboard fold.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::model::{Event, Task, UploadBatch};

/// Which tasks are hidden because their upload batch is disabled.
#[derive(Debug, Clone, Default)]
pub struct VisibilityIndex {
    task_uploads: HashMap<String, String>,
    inactive_uploads: HashSet<String>,
}

impl VisibilityIndex {
    pub fn build(tasks: &[Task], uploads: &[UploadBatch]) -> Self {
        let task_uploads = tasks
            .iter()
            .filter_map(|task| {
                task.upload_id
                    .as_ref()
                    .map(|upload_id| (task.task_id.clone(), upload_id.clone()))
            })
            .collect();
        Self::from_parts(task_uploads, inactive_upload_ids(uploads))
    }

    pub fn from_parts(
        task_uploads: HashMap<String, String>,
        inactive_uploads: HashSet<String>,
    ) -> Self {
        Self {
            task_uploads,
            inactive_uploads,
        }
    }

    /// True when the upload exists and is disabled. Missing ids are visible.
    pub fn upload_hidden(&self, upload_id: Option<&str>) -> bool {
        upload_id.is_some_and(|id| self.inactive_uploads.contains(id))
    }

    pub fn task_hidden(&self, task_id: &str) -> bool {
        self.upload_hidden(self.task_uploads.get(task_id).map(String::as_str))
    }
}

pub fn inactive_upload_ids(uploads: &[UploadBatch]) -> HashSet<String> {
    uploads
        .iter()
        .filter(|upload| !upload.active)
        .map(|upload| upload.upload_id.clone())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct LatestEvents {
    pub rows: Vec<Event>,
    /// Events skipped because they carry no logical key.
    pub orphaned: usize,
}

/// Keeps one event per `unique_key`: the greatest `event_time` string.
///
/// Only a strictly greater timestamp replaces the current winner, so on exact
/// ties the event scanned first is kept. Events of hidden tasks are ignored.
/// Rows come back newest first.
pub fn fold_latest<'a, I>(events: I, visibility: &VisibilityIndex) -> LatestEvents
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut best: HashMap<&'a str, &'a Event> = HashMap::new();
    let mut orphaned = 0;

    for event in events {
        let Some(key) = event.unique_key.as_deref().filter(|key| !key.is_empty()) else {
            orphaned += 1;
            continue;
        };
        if visibility.task_hidden(&event.task_id) {
            continue;
        }
        match best.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(event);
            }
            Entry::Occupied(mut slot) => {
                if event.event_time > slot.get().event_time {
                    slot.insert(event);
                }
            }
        }
    }

    let mut rows: Vec<Event> = best.into_values().cloned().collect();
    rows.sort_by(|a, b| {
        b.event_time
            .cmp(&a.event_time)
            .then_with(|| a.unique_key.cmp(&b.unique_key))
    });

    LatestEvents { rows, orphaned }
}

/// Stable ascending sort by the raw `event_time` string.
pub fn sort_history(events: &mut [Event]) {
    events.sort_by(|a, b| a.event_time.cmp(&b.event_time));
}
