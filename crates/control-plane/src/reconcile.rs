//! Build status reconciliation.
//!
//! Per app, three sources of build state can race: the record created
//! optimistically at dispatch time, one-shot snapshots of recent rows, and
//! completion events pushed by the CI webhook or the sweeper. `BuildTracker`
//! merges them into one non-regressing record per build track: an id match
//! hands authority back to the server, a strictly newer `created_at` wins,
//! and otherwise the pinned record keeps masking stale fetches.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{AppBuild, BuildStatus, BuildType};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BuildRecord {
    pub id: Uuid,
    pub build_type: BuildType,
    pub status: BuildStatus,
    pub progress: i32,
    pub download_url: Option<String>,
    pub build_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BuildRecord {
    /// Rows carrying tags this version does not know are skipped rather than
    /// failing the whole merge.
    pub fn from_row(row: &AppBuild) -> Option<Self> {
        Some(Self {
            id: row.id,
            build_type: BuildType::parse(&row.build_type)?,
            status: BuildStatus::parse(&row.status)?,
            progress: row.progress,
            download_url: row.download_url.clone(),
            build_message: row.build_message.clone(),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Default)]
pub struct BuildTracker {
    /// build_type -> last locally dispatched record. Set only by `pin`,
    /// never by server-originated events.
    pinned: HashMap<BuildType, BuildRecord>,
    /// All server-observed rows, sorted descending by created_at. Entries are
    /// replaced in place or appended, never removed by events.
    server: Vec<BuildRecord>,
}

impl BuildTracker {
    /// Record a locally created build the instant it is dispatched.
    pub fn pin(&mut self, record: BuildRecord) {
        self.pinned.insert(record.build_type, record);
    }

    /// A new row appeared on the server (INSERT-style event).
    pub fn apply_insert(&mut self, record: BuildRecord) {
        self.upsert_server(record);
    }

    /// An existing row changed (UPDATE-style event). Also refreshes the
    /// pinned entry in place when ids match, so progress stays visible while
    /// the pin is still authoritative.
    pub fn apply_update(&mut self, record: BuildRecord) {
        if let Some(p) = self.pinned.get_mut(&record.build_type) {
            if p.id == record.id {
                overwrite(p, &record);
            }
        }
        self.upsert_server(record);
    }

    /// Merge a one-shot fetch of recent rows. Dedupe by id; never blindly
    /// replace the accumulated list.
    pub fn merge_snapshot<I: IntoIterator<Item = BuildRecord>>(&mut self, rows: I) {
        for record in rows {
            self.apply_update(record);
        }
    }

    /// A row was destructively deleted by the user; unlike server events this
    /// does remove state.
    pub fn forget(&mut self, id: Uuid) {
        self.server.retain(|r| r.id != id);
        self.pinned.retain(|_, r| r.id != id);
    }

    /// Resolve the single record to show for a track.
    pub fn latest(&self, build_type: BuildType) -> Option<&BuildRecord> {
        let server_latest = self.server.iter().find(|r| r.build_type == build_type);
        let Some(pinned) = self.pinned.get(&build_type) else {
            return server_latest;
        };
        match server_latest {
            // Server caught up to the same build: its status/progress is fresher.
            Some(s) if s.id == pinned.id => Some(s),
            // A genuinely newer build superseded the pinned one.
            Some(s) if s.created_at > pinned.created_at => Some(s),
            // Stale fetch (or nothing yet): keep showing the pin.
            _ => Some(pinned),
        }
    }

    /// Current record per track, for tracks that have one.
    pub fn current(&self) -> Vec<BuildRecord> {
        BuildType::ALL
            .iter()
            .filter_map(|t| self.latest(*t).cloned())
            .collect()
    }

    fn upsert_server(&mut self, record: BuildRecord) {
        match self.server.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => overwrite(existing, &record),
            None => self.server.push(record),
        }
        self.server.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

/// Replace `dst` with `src`, except that a terminal status never reverts to a
/// non-terminal one. Re-delivering the same event is a no-op.
fn overwrite(dst: &mut BuildRecord, src: &BuildRecord) {
    if dst.status.is_terminal() && !src.status.is_terminal() {
        return;
    }
    *dst = src.clone();
}

/// One tracker per app id, shared across handlers and the sweeper.
pub type Trackers = Arc<Mutex<HashMap<Uuid, BuildTracker>>>;

pub fn new_trackers() -> Trackers {
    Arc::new(Mutex::new(HashMap::new()))
}

pub fn with_tracker<R>(trackers: &Trackers, app_id: Uuid, f: impl FnOnce(&mut BuildTracker) -> R) -> R {
    let mut map = trackers.lock().expect("tracker mutex poisoned");
    f(map.entry(app_id).or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rec(id: u128, t: BuildType, status: BuildStatus, at: DateTime<Utc>) -> BuildRecord {
        BuildRecord {
            id: Uuid::from_u128(id),
            build_type: t,
            status,
            progress: 0,
            download_url: None,
            build_message: None,
            created_at: at,
        }
    }

    #[test]
    fn no_pin_returns_newest_server_row_of_type() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.apply_insert(rec(1, BuildType::AndroidApp, BuildStatus::Ready, t0 - Duration::seconds(60)));
        tr.apply_insert(rec(2, BuildType::AndroidApp, BuildStatus::Building, t0));
        tr.apply_insert(rec(3, BuildType::IosApp, BuildStatus::Queued, t0));
        assert_eq!(tr.latest(BuildType::AndroidApp).unwrap().id, Uuid::from_u128(2));
        assert_eq!(tr.latest(BuildType::IosApp).unwrap().id, Uuid::from_u128(3));
        assert!(tr.latest(BuildType::AndroidSource).is_none());
    }

    #[test]
    fn pin_masks_stale_server_fetch() {
        // Dispatch at t0; background fetch returns an older, unrelated build.
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.pin(rec(10, BuildType::AndroidApp, BuildStatus::Queued, t0));
        tr.merge_snapshot(vec![rec(9, BuildType::AndroidApp, BuildStatus::Ready, t0 - Duration::seconds(5))]);
        let shown = tr.latest(BuildType::AndroidApp).unwrap();
        assert_eq!(shown.id, Uuid::from_u128(10));
        assert_eq!(shown.status, BuildStatus::Queued);
    }

    #[test]
    fn server_wins_on_id_match_regardless_of_timestamps() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.pin(rec(10, BuildType::AndroidApp, BuildStatus::Queued, t0));
        // Server clock says the row is older than the local pin; id match
        // still hands authority to the server copy.
        let mut server_copy = rec(10, BuildType::AndroidApp, BuildStatus::Building, t0 - Duration::seconds(2));
        server_copy.progress = 40;
        tr.merge_snapshot(vec![server_copy]);
        let shown = tr.latest(BuildType::AndroidApp).unwrap();
        assert_eq!(shown.status, BuildStatus::Building);
        assert_eq!(shown.progress, 40);
    }

    #[test]
    fn newer_server_build_supersedes_pin() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.pin(rec(10, BuildType::AndroidApp, BuildStatus::Queued, t0));
        tr.apply_insert(rec(11, BuildType::AndroidApp, BuildStatus::Queued, t0 + Duration::seconds(3)));
        assert_eq!(tr.latest(BuildType::AndroidApp).unwrap().id, Uuid::from_u128(11));
    }

    #[test]
    fn update_refreshes_pin_in_place() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.pin(rec(10, BuildType::AndroidApp, BuildStatus::Queued, t0));
        let mut upd = rec(10, BuildType::AndroidApp, BuildStatus::Ready, t0);
        upd.download_url = Some("https://x/app.apk".into());
        tr.apply_update(upd);
        let shown = tr.latest(BuildType::AndroidApp).unwrap();
        assert_eq!(shown.status, BuildStatus::Ready);
        assert_eq!(shown.download_url.as_deref(), Some("https://x/app.apk"));
    }

    #[test]
    fn update_redelivery_is_idempotent() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.pin(rec(10, BuildType::AndroidApp, BuildStatus::Queued, t0));
        let mut upd = rec(10, BuildType::AndroidApp, BuildStatus::Ready, t0);
        upd.download_url = Some("https://x/app.apk".into());
        tr.apply_update(upd.clone());
        let first = tr.latest(BuildType::AndroidApp).unwrap().clone();
        tr.apply_update(upd);
        assert_eq!(tr.latest(BuildType::AndroidApp).unwrap(), &first);
    }

    #[test]
    fn terminal_status_never_reverts() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.apply_insert(rec(10, BuildType::AndroidApp, BuildStatus::Ready, t0));
        // A late out-of-order progress event must not resurrect the build.
        let mut stale = rec(10, BuildType::AndroidApp, BuildStatus::Building, t0);
        stale.progress = 80;
        tr.apply_update(stale);
        assert_eq!(tr.latest(BuildType::AndroidApp).unwrap().status, BuildStatus::Ready);
    }

    #[test]
    fn tracks_resolve_independently() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.pin(rec(10, BuildType::AndroidApp, BuildStatus::Queued, t0));
        tr.merge_snapshot(vec![
            rec(1, BuildType::AndroidApp, BuildStatus::Ready, t0 - Duration::seconds(100)),
            rec(2, BuildType::IosSource, BuildStatus::Failed, t0 - Duration::seconds(50)),
        ]);
        assert_eq!(tr.latest(BuildType::AndroidApp).unwrap().id, Uuid::from_u128(10));
        assert_eq!(tr.latest(BuildType::IosSource).unwrap().id, Uuid::from_u128(2));
    }

    #[test]
    fn forget_removes_deleted_rows() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.pin(rec(10, BuildType::AndroidApp, BuildStatus::Queued, t0));
        tr.merge_snapshot(vec![rec(10, BuildType::AndroidApp, BuildStatus::Failed, t0)]);
        tr.forget(Uuid::from_u128(10));
        assert!(tr.latest(BuildType::AndroidApp).is_none());
    }

    #[test]
    fn current_covers_only_tracks_with_records() {
        let mut tr = BuildTracker::default();
        let t0 = Utc::now();
        tr.apply_insert(rec(1, BuildType::AndroidApp, BuildStatus::Building, t0));
        tr.apply_insert(rec(2, BuildType::IosApp, BuildStatus::Queued, t0));
        let current = tr.current();
        assert_eq!(current.len(), 2);
    }
}
