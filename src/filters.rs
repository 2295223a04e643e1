use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Wire keys of the eight filter fields, in display order. Merge results are
/// reported in this order so highlights are deterministic.
pub const FIELD_KEYS: [&str; 8] = [
    "client",
    "clientStyle",
    "boxNumber",
    "label",
    "size",
    "gender",
    "age",
    "garmentType",
];

/// The manual filter form. An unset field is the empty string, never an
/// omitted key; the backend expects all eight keys on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterState {
    pub client: String,
    pub client_style: String,
    pub box_number: String,
    pub label: String,
    pub size: String,
    pub gender: String,
    pub age: String,
    pub garment_type: String,
}

impl FilterState {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "client" => Some(&self.client),
            "clientStyle" => Some(&self.client_style),
            "boxNumber" => Some(&self.box_number),
            "label" => Some(&self.label),
            "size" => Some(&self.size),
            "gender" => Some(&self.gender),
            "age" => Some(&self.age),
            "garmentType" => Some(&self.garment_type),
            _ => None,
        }
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut String> {
        match key {
            "client" => Some(&mut self.client),
            "clientStyle" => Some(&mut self.client_style),
            "boxNumber" => Some(&mut self.box_number),
            "label" => Some(&mut self.label),
            "size" => Some(&mut self.size),
            "gender" => Some(&mut self.gender),
            "age" => Some(&mut self.age),
            "garmentType" => Some(&mut self.garment_type),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        FIELD_KEYS
            .iter()
            .all(|key| self.get(key).is_some_and(str::is_empty))
    }

    pub fn active_count(&self) -> usize {
        FIELD_KEYS
            .iter()
            .filter(|key| !self.get(key).unwrap_or_default().is_empty())
            .count()
    }
}

/// Field guesses extracted by the backend alongside a chat reply. Partial by
/// nature; consumed by a single merge and not retained.
pub type ExtractedFilters = HashMap<String, String>;

/// Merges extracted values into the form. Only currently-blank fields are
/// filled; a non-blank manual value always wins. Returns the keys that
/// actually changed, in field order.
pub fn merge_extracted(form: &mut FilterState, delta: &ExtractedFilters) -> Vec<String> {
    let mut changed = Vec::new();
    for key in FIELD_KEYS {
        let Some(raw) = delta.get(key) else { continue };
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        if let Some(slot) = form.get_mut(key) {
            if slot.is_empty() {
                *slot = value.to_string();
                changed.push(key.to_string());
            }
        }
    }
    changed
}

/// How long a freshly auto-filled field stays visually highlighted.
pub const HIGHLIGHT_WINDOW: Duration = Duration::from_millis(2000);

/// Holds both filter instances that matter: the user-editable form and the
/// chat-context snapshot sent with every message, plus the transient
/// auto-fill highlight bookkeeping.
#[derive(Debug)]
pub struct FilterPanel {
    form: FilterState,
    context: FilterState,
    highlighted: Vec<String>,
    highlight_expires: Option<Instant>,
    generation: u64,
}

impl Default for FilterPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterPanel {
    pub fn new() -> Self {
        Self {
            form: FilterState::default(),
            context: FilterState::default(),
            highlighted: Vec::new(),
            highlight_expires: None,
            generation: 0,
        }
    }

    pub fn form(&self) -> &FilterState {
        &self.form
    }

    /// The snapshot accompanying the next chat request. Reflects the form as
    /// observed at the last merge, apply or clear.
    pub fn context(&self) -> &FilterState {
        &self.context
    }

    /// Applies a reply's extracted filters. Non-blank form fields are never
    /// overwritten. Changed keys get a highlight whose window restarts on
    /// every merge; the merged form becomes the new chat context.
    pub fn merge_extracted(&mut self, delta: &ExtractedFilters, now: Instant) -> Vec<String> {
        let changed = merge_extracted(&mut self.form, delta);
        if !changed.is_empty() {
            self.highlighted = changed.clone();
            self.highlight_expires = Some(now + HIGHLIGHT_WINDOW);
            self.generation += 1;
        }
        self.context = self.form.clone();
        changed
    }

    /// An explicit "Apply": the snapshot is authoritative for all eight
    /// fields and supersedes any previously suggested values.
    pub fn apply_manual(&mut self, snapshot: FilterState) {
        self.form = snapshot.clone();
        self.context = snapshot;
    }

    /// Resets form and chat context to all-blank in one step.
    pub fn clear_all(&mut self) {
        self.form = FilterState::default();
        self.context = FilterState::default();
        self.highlighted.clear();
        self.highlight_expires = None;
    }

    /// Keys still carrying the auto-fill highlight as of `now`.
    pub fn highlighted_at(&self, now: Instant) -> Vec<String> {
        match self.highlight_expires {
            Some(expires) if now < expires => self.highlighted.clone(),
            _ => Vec::new(),
        }
    }

    /// Monotonic merge counter; a scheduled expiry only fires if no newer
    /// merge restarted the window.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drops the highlight if `generation` still identifies the latest
    /// merge. Returns whether anything was cleared.
    pub fn expire_highlight(&mut self, generation: u64) -> bool {
        if self.generation == generation && !self.highlighted.is_empty() {
            self.highlighted.clear();
            self.highlight_expires = None;
            true
        } else {
            false
        }
    }
}
