use annotation_client::{
    EntitiesPayload, FlagSeverity, InsightEvent, InsightKind, QuestionPriority,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Clinician triage status of a reviewable item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    Accepted,
    Dismissed,
    Asked,
}

/// Kind-specific display metadata captured at first sighting
#[derive(Debug, Clone, PartialEq)]
pub enum ItemDetail {
    FollowUp {
        category: String,
        priority: QuestionPriority,
    },
    RedFlag {
        severity: FlagSeverity,
        rationale: Option<String>,
    },
}

/// A deduplicated, clinician-actionable suggestion
///
/// Identified by its dedup key (question text or flag description). Status
/// is clinician-driven and survives any number of re-extractions of the
/// same finding.
#[derive(Debug, Clone)]
pub struct ReviewableItem {
    pub key: String,
    pub kind: InsightKind,
    pub status: ReviewStatus,
    /// Sequence number assigned exactly once, when the key is first seen
    pub first_seen_order: u64,
    pub detail: ItemDetail,
}

#[derive(Default)]
struct StoreState {
    /// Append-only log of every event received
    events: Vec<InsightEvent>,
    items: HashMap<String, ReviewableItem>,
    next_order: u64,
    /// Entities are cumulative extraction state: latest snapshot wins
    latest_entities: Option<EntitiesPayload>,
    closed: bool,
}

/// Merges insight events into a stable, deduplicated, order-preserving view
///
/// Re-analysis of overlapping transcript text re-extracts the same findings;
/// once a clinician has triaged a suggestion, that decision must not be
/// reset or the item reordered back to the top. New events only ever add
/// items whose key has not been seen before.
///
/// Event-arrival and clinician-action paths serialize on one lock.
#[derive(Default)]
pub struct InsightStore {
    state: RwLock<StoreState>,
}

impl InsightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one event. Returns the number of newly-created reviewable
    /// items (zero for duplicates, entities, and closed stores).
    pub fn ingest(&self, event: InsightEvent) -> usize {
        let mut state = self.state.write();

        if state.closed {
            debug!(event_id = %event.id, "Discarding insight event for ended session");
            return 0;
        }

        let mut created = 0;

        match event.kind {
            InsightKind::Entities => {
                if let Some(payload) = event.entities() {
                    state.latest_entities = Some(payload);
                }
            }
            InsightKind::FollowUp => {
                if let Some(payload) = event.follow_ups() {
                    for question in payload.questions {
                        let key = question.question.trim().to_string();
                        let detail = ItemDetail::FollowUp {
                            category: question.category,
                            priority: question.priority,
                        };
                        created += insert_item(&mut state, key, InsightKind::FollowUp, detail);
                    }
                }
            }
            InsightKind::RedFlag => {
                if let Some(payload) = event.red_flags() {
                    for flag in payload.flags {
                        let key = flag.description.trim().to_string();
                        let detail = ItemDetail::RedFlag {
                            severity: flag.severity,
                            rationale: flag.rationale,
                        };
                        created += insert_item(&mut state, key, InsightKind::RedFlag, detail);
                    }
                }
            }
        }

        state.events.push(event);
        created
    }

    /// Accept a suggestion. Idempotent.
    pub fn accept(&self, key: &str) -> bool {
        self.transition(key, ReviewStatus::Accepted)
    }

    /// Dismiss a suggestion as not relevant. Idempotent.
    pub fn dismiss(&self, key: &str) -> bool {
        self.transition(key, ReviewStatus::Dismissed)
    }

    /// Record that the clinician asked a follow-up question. Idempotent.
    pub fn mark_asked(&self, key: &str) -> bool {
        self.transition(key, ReviewStatus::Asked)
    }

    /// Return a dismissed item to the review queue. No-op for items in any
    /// other status.
    pub fn restore(&self, key: &str) -> bool {
        let mut state = self.state.write();
        match state.items.get_mut(key) {
            Some(item) if item.status == ReviewStatus::Dismissed => {
                item.status = ReviewStatus::Pending;
                debug!(key, "Restored dismissed item");
                true
            }
            _ => false,
        }
    }

    fn transition(&self, key: &str, status: ReviewStatus) -> bool {
        let mut state = self.state.write();
        match state.items.get_mut(key) {
            Some(item) if item.status != status => {
                debug!(key, from = ?item.status, to = ?status, "Review status change");
                item.status = status;
                true
            }
            Some(_) => false,
            None => {
                trace!(key, "Status change for unknown key ignored");
                false
            }
        }
    }

    /// Stop accepting events; in-flight analysis results arriving after the
    /// session ends are discarded here.
    pub fn close(&self) {
        self.state.write().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Snapshot of all reviewable items, unordered
    pub fn items(&self) -> Vec<ReviewableItem> {
        self.state.read().items.values().cloned().collect()
    }

    pub fn item(&self, key: &str) -> Option<ReviewableItem> {
        self.state.read().items.get(key).cloned()
    }

    /// Latest cumulative entities snapshot
    pub fn latest_entities(&self) -> Option<EntitiesPayload> {
        self.state.read().latest_entities.clone()
    }

    /// Number of events in the append-only log
    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    /// Display-ordered view for one insight kind
    pub fn display(&self, kind: InsightKind, visible_pending: Option<usize>) -> InsightView {
        let items: Vec<ReviewableItem> = self
            .state
            .read()
            .items
            .values()
            .filter(|item| item.kind == kind)
            .cloned()
            .collect();
        display_order(items, visible_pending)
    }
}

fn insert_item(state: &mut StoreState, key: String, kind: InsightKind, detail: ItemDetail) -> usize {
    if key.is_empty() || state.items.contains_key(&key) {
        return 0;
    }

    let order = state.next_order;
    state.next_order += 1;

    state.items.insert(
        key.clone(),
        ReviewableItem {
            key,
            kind,
            status: ReviewStatus::Pending,
            first_seen_order: order,
            detail,
        },
    );
    1
}

/// Display-ordered items plus the count hidden behind "show more"
#[derive(Debug, Clone)]
pub struct InsightView {
    pub items: Vec<ReviewableItem>,
    pub hidden_pending: usize,
}

/// Presentation ordering over the store's data: pending first (first-seen
/// order, optionally capped to a visible window), then accepted/asked, then
/// dismissed last, each group in original order. A pure function — the
/// underlying log stays append-only.
pub fn display_order(mut items: Vec<ReviewableItem>, visible_pending: Option<usize>) -> InsightView {
    items.sort_by_key(|item| item.first_seen_order);

    let mut pending = Vec::new();
    let mut reviewed = Vec::new();
    let mut dismissed = Vec::new();

    for item in items {
        match item.status {
            ReviewStatus::Pending => pending.push(item),
            ReviewStatus::Accepted | ReviewStatus::Asked => reviewed.push(item),
            ReviewStatus::Dismissed => dismissed.push(item),
        }
    }

    let hidden_pending = match visible_pending {
        Some(limit) if pending.len() > limit => {
            let hidden = pending.split_off(limit);
            hidden.len()
        }
        _ => 0,
    };

    let mut ordered = pending;
    ordered.extend(reviewed);
    ordered.extend(dismissed);

    InsightView {
        items: ordered,
        hidden_pending,
    }
}
