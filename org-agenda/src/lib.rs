//! Org agenda library.
//! Turns a forest of parsed org headlines into dated, grouped and sorted agenda
//! views and TODO lists. The pipeline is pure; parsing and file discovery sit at
//! the edges (`parser`, the binary).

pub mod core {
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{
        fmt,
        path::{Path, PathBuf},
    };

    /* ------------------------------ Headlines ------------------------------ */

    /// A headline node with its planning info and child headlines (Org tree).
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct HeadlineNode {
        /// Raw title without keyword, priority cookie or tags. May be empty.
        #[serde(default)]
        pub title: String,

        /// TODO keyword (e.g., TODO, WIP, DONE).
        pub todo_state: Option<String>,

        /// Single-letter priority like [#A].
        pub priority: Option<Priority>,

        /// Tags after the headline (`:tag1:tag2:`), in source order.
        #[serde(default)]
        pub tags: Vec<String>,

        /// Property drawer (key/value string pairs).
        #[serde(default)]
        pub properties: IndexMap<String, String>,

        /// 1-based line of the headline in its file.
        pub line_number: usize,

        /// Planning line(s): SCHEDULED, DEADLINE, CLOSED.
        pub planning: Option<PlanningInfo>,

        #[serde(default)]
        pub children: Vec<HeadlineNode>,
    }

    impl HeadlineNode {
        pub fn new(line_number: usize, title: impl Into<String>) -> Self {
            Self {
                title: title.into(),
                line_number,
                ..Default::default()
            }
        }

        pub fn with_todo(mut self, state: impl Into<String>) -> Self {
            self.todo_state = Some(state.into());
            self
        }

        pub fn with_priority(mut self, priority: char) -> Self {
            self.priority = Some(Priority(priority));
            self
        }

        pub fn with_tags<I, S>(mut self, tags: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.tags = tags.into_iter().map(Into::into).collect();
            self
        }

        pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.properties.insert(key.into(), value.into());
            self
        }

        pub fn scheduled(mut self, ts: TimestampSpec) -> Self {
            self.planning.get_or_insert_with(Default::default).scheduled = Some(ts);
            self
        }

        pub fn deadline(mut self, ts: TimestampSpec) -> Self {
            self.planning.get_or_insert_with(Default::default).deadline = Some(ts);
            self
        }

        pub fn closed(mut self, ts: TimestampSpec) -> Self {
            self.planning.get_or_insert_with(Default::default).closed = Some(ts);
            self
        }

        pub fn with_child(mut self, child: HeadlineNode) -> Self {
            self.children.push(child);
            self
        }

        /// Explicit `CATEGORY` property, if set and non-empty. Keys match case-insensitively.
        pub fn category(&self) -> Option<&str> {
            self.properties
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("CATEGORY"))
                .map(|(_, c)| c.trim())
                .filter(|c| !c.is_empty())
        }

        pub fn has_tag(&self, tag: &str) -> bool {
            self.tags.iter().any(|t| t == tag)
        }
    }

    /// Single-letter priority, e.g. [#A].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Priority(pub char);

    impl fmt::Display for Priority {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    /* ------------------------------ Planning ------------------------------ */

    /// Planning line(s): SCHEDULED, DEADLINE, CLOSED.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct PlanningInfo {
        pub scheduled: Option<TimestampSpec>,
        pub deadline: Option<TimestampSpec>,
        pub closed: Option<TimestampSpec>,
    }

    /// A parsed org timestamp, still in raw calendar fields.
    ///
    /// A spec whose year, month and day are all zero carries no date. Out-of-range
    /// fields (month 13, February 30) also resolve to no date.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TimestampSpec {
        pub year: i32,
        /// 1-indexed.
        pub month: u32,
        pub day: u32,
        pub hour: Option<u32>,
        pub minute: Option<u32>,
        /// Optional repeater cookie (`+1w`, `++1m`, `.+2d`).
        pub repeater: Option<Repeater>,
    }

    impl TimestampSpec {
        pub fn new(year: i32, month: u32, day: u32) -> Self {
            Self {
                year,
                month,
                day,
                ..Default::default()
            }
        }

        pub fn at(mut self, hour: u32, minute: u32) -> Self {
            self.hour = Some(hour);
            self.minute = Some(minute);
            self
        }

        pub fn every(mut self, kind: RepeaterKind, value: u32, unit: RepeaterUnit) -> Self {
            self.repeater = Some(Repeater { kind, value, unit });
            self
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Repeater {
        pub kind: RepeaterKind,
        pub value: u32,
        pub unit: RepeaterUnit,
    }

    impl fmt::Display for Repeater {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}{}{}", self.kind.cookie(), self.value, self.unit.as_char())
        }
    }

    /// `+` (from last), `++` (from base), `.+` (from now).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum RepeaterKind {
        #[serde(rename = "+")]
        FromLast,
        #[serde(rename = "++")]
        FromBase,
        #[serde(rename = ".+")]
        FromNow,
    }

    impl RepeaterKind {
        pub fn cookie(self) -> &'static str {
            match self {
                RepeaterKind::FromLast => "+",
                RepeaterKind::FromBase => "++",
                RepeaterKind::FromNow => ".+",
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum RepeaterUnit {
        #[serde(rename = "h")]
        Hour,
        #[serde(rename = "d")]
        Day,
        #[serde(rename = "w")]
        Week,
        #[serde(rename = "m")]
        Month,
        #[serde(rename = "y")]
        Year,
    }

    impl RepeaterUnit {
        pub fn as_char(self) -> char {
            match self {
                RepeaterUnit::Hour => 'h',
                RepeaterUnit::Day => 'd',
                RepeaterUnit::Week => 'w',
                RepeaterUnit::Month => 'm',
                RepeaterUnit::Year => 'y',
            }
        }

        pub fn from_char(c: char) -> Option<Self> {
            match c {
                'h' => Some(RepeaterUnit::Hour),
                'd' => Some(RepeaterUnit::Day),
                'w' => Some(RepeaterUnit::Week),
                'm' => Some(RepeaterUnit::Month),
                'y' => Some(RepeaterUnit::Year),
                _ => None,
            }
        }
    }

    /* ---------------------------- TODO keywords ---------------------------- */

    /// TODO vocabulary. Anything not listed as done counts as an open state.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TodoKeywords {
        #[serde(default)]
        pub open: Vec<String>,
        #[serde(default)]
        pub done: Vec<String>,
    }

    impl Default for TodoKeywords {
        fn default() -> Self {
            Self {
                open: ["TODO", "NEXT", "WAIT", "WIP"].map(String::from).to_vec(),
                done: ["DONE", "CANCELLED"].map(String::from).to_vec(),
            }
        }
    }

    impl TodoKeywords {
        pub fn is_done(&self, state: &str) -> bool {
            self.done.iter().any(|d| d == state)
        }

        pub fn is_keyword(&self, word: &str) -> bool {
            self.open.iter().chain(&self.done).any(|k| k == word)
        }

        /// Add an in-buffer `#+TODO:` sequence. `|` splits open from done states;
        /// without a divider the last word is the done state.
        pub fn add_sequence<'w>(&mut self, words: impl IntoIterator<Item = &'w str>) {
            let words: Vec<&str> = words
                .into_iter()
                // fast-access keys: `TODO(t)`
                .map(|w| w.split('(').next().unwrap_or(w))
                .filter(|w| !w.is_empty())
                .collect();
            let (open, done) = match words.iter().position(|w| *w == "|") {
                Some(pos) => (&words[..pos], &words[pos + 1..]),
                None => match words.split_last() {
                    Some((last, rest)) => (rest, std::slice::from_ref(last)),
                    None => return,
                },
            };
            for w in open {
                if !self.is_keyword(w) {
                    self.open.push(w.to_string());
                }
            }
            for w in done {
                if !self.is_keyword(w) {
                    self.done.push(w.to_string());
                }
            }
        }

        pub fn merge(&mut self, other: &TodoKeywords) {
            for w in &other.open {
                if !self.is_keyword(w) {
                    self.open.push(w.clone());
                }
            }
            for w in &other.done {
                if !self.is_keyword(w) {
                    self.done.push(w.clone());
                }
            }
        }
    }

    /* ------------------------------ File index ------------------------------ */

    /// Attribution used when a headline is missing from the file index.
    pub const UNKNOWN_FILE: &str = "unknown";

    /// `"{line}:{title}"` → file path lookup built by the caller from its file set.
    ///
    /// Two headlines with the same line and title in different files share a key;
    /// the last registered one wins.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FileIndex {
        entries: IndexMap<String, PathBuf>,
    }

    impl FileIndex {
        pub fn key(line_number: usize, title: &str) -> String {
            format!("{line_number}:{title}")
        }

        pub fn insert(&mut self, line_number: usize, title: &str, path: impl Into<PathBuf>) {
            self.entries
                .insert(Self::key(line_number, title), path.into());
        }

        pub fn lookup(&self, line_number: usize, title: &str) -> Option<&Path> {
            self.entries
                .get(&Self::key(line_number, title))
                .map(PathBuf::as_path)
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }
    }

}

pub mod agenda {
    //! Read-model types for agenda views: items, groups, view configuration.

    use super::core::*;
    use chrono::{Datelike, Days, NaiveDate};
    use serde::{Deserialize, Serialize};
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum AgendaType {
        Scheduled,
        Deadline,
        Diary,
    }

    /// One agenda row, derived from exactly one planning fact (or a diary entry).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct AgendaItem<'a> {
        pub title: String,
        pub tags: Vec<String>,
        /// Attributed file path, or `"unknown"`.
        pub file: String,
        pub line: usize,
        #[serde(skip)]
        pub headline: Option<&'a HeadlineNode>,
        pub agenda_type: AgendaType,
        pub category: Option<String>,
        pub todo_state: Option<String>,
        pub priority: Option<Priority>,
        /// Day this item is listed under. Overdue deadlines are listed under today.
        pub date: NaiveDate,
        /// `HH:MM` when the timestamp carried a time.
        pub time: Option<String>,
        pub days_until: Option<i64>,
        pub overdue: Option<bool>,
        pub repeater: Option<String>,
    }

    impl<'a> AgendaItem<'a> {
        /// A diary entry resolved by the caller. `years` feeds the "(N years)" display.
        pub fn diary(title: impl Into<String>, date: NaiveDate, years: Option<i64>) -> Self {
            Self {
                title: title.into(),
                tags: vec![],
                file: UNKNOWN_FILE.to_string(),
                line: 0,
                headline: None,
                agenda_type: AgendaType::Diary,
                category: None,
                todo_state: None,
                priority: None,
                date,
                time: None,
                days_until: years,
                overdue: None,
                repeater: None,
            }
        }
    }

    /// Largest window a view may span. Larger day counts are rejected by the
    /// settings loader and the binary.
    pub const MAX_VIEW_DAYS: u32 = 3660;

    /// Inclusive date window.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AgendaRange {
        pub from: NaiveDate,
        pub to: NaiveDate, // inclusive
    }

    impl AgendaRange {
        /// Window of `days` days starting at `from`. Zero days yields an empty window.
        /// A window running past the last representable date is clamped, so keep
        /// `days` within `MAX_VIEW_DAYS`.
        pub fn new(from: NaiveDate, days: u32) -> Self {
            let to = match days.checked_sub(1) {
                Some(n) => from
                    .checked_add_days(Days::new(u64::from(n)))
                    .unwrap_or(NaiveDate::MAX),
                None => from.pred_opt().unwrap_or(NaiveDate::MIN),
            };
            Self { from, to }
        }

        pub fn contains(&self, date: NaiveDate) -> bool {
            date >= self.from && date <= self.to
        }

        /// Every day of the window, in order.
        pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
            let to = self.to;
            self.from.iter_days().take_while(move |d| *d <= to)
        }
    }

    /* ---------------------------- View configuration ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ViewType {
        Day,
        Week,
        Fortnight,
        Month,
    }

    impl ViewType {
        /// Day count of the preset when it starts on `start`.
        pub fn days_from(self, start: NaiveDate) -> u32 {
            match self {
                ViewType::Day => 1,
                ViewType::Week => 7,
                ViewType::Fortnight => 14,
                ViewType::Month => days_in_month(start),
            }
        }
    }

    fn days_in_month(date: NaiveDate) -> u32 {
        let (y, m) = (date.year(), date.month());
        let first = NaiveDate::from_ymd_opt(y, m, 1);
        let next = if m == 12 {
            NaiveDate::from_ymd_opt(y + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(y, m + 1, 1)
        };
        match (first, next) {
            (Some(a), Some(b)) => u32::try_from((b - a).num_days()).unwrap_or(31),
            _ => 31,
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum SortBy {
        Time,
        Priority,
        Category,
        Todo,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum GroupBy {
        #[default]
        Date,
        Category,
        Todo,
        Priority,
        Tag,
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("unknown {kind} {value:?} (expected one of: {expected})")]
    pub struct UnknownVariant {
        pub kind: &'static str,
        pub value: String,
        pub expected: &'static str,
    }

    impl FromStr for ViewType {
        type Err = UnknownVariant;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.to_ascii_lowercase().as_str() {
                "day" => Ok(ViewType::Day),
                "week" => Ok(ViewType::Week),
                "fortnight" => Ok(ViewType::Fortnight),
                "month" => Ok(ViewType::Month),
                _ => Err(UnknownVariant {
                    kind: "view",
                    value: s.to_string(),
                    expected: "day, week, fortnight, month",
                }),
            }
        }
    }

    impl FromStr for SortBy {
        type Err = UnknownVariant;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.to_ascii_lowercase().as_str() {
                "time" => Ok(SortBy::Time),
                "priority" => Ok(SortBy::Priority),
                "category" => Ok(SortBy::Category),
                "todo" => Ok(SortBy::Todo),
                _ => Err(UnknownVariant {
                    kind: "sort order",
                    value: s.to_string(),
                    expected: "time, priority, category, todo",
                }),
            }
        }
    }

    impl FromStr for GroupBy {
        type Err = UnknownVariant;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.to_ascii_lowercase().as_str() {
                "date" => Ok(GroupBy::Date),
                "category" => Ok(GroupBy::Category),
                "todo" => Ok(GroupBy::Todo),
                "priority" => Ok(GroupBy::Priority),
                "tag" => Ok(GroupBy::Tag),
                _ => Err(UnknownVariant {
                    kind: "grouping",
                    value: s.to_string(),
                    expected: "date, category, todo, priority, tag",
                }),
            }
        }
    }

    fn default_true() -> bool {
        true
    }

    /// Agenda view request. Empty filter lists behave like unset ones.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AgendaViewConfig {
        #[serde(rename = "type", default)]
        pub view_type: Option<ViewType>,
        pub start_date: NaiveDate,
        /// Between 1 and `MAX_VIEW_DAYS`.
        pub days: u32,
        #[serde(default)]
        pub todo_states: Option<Vec<String>>,
        #[serde(default)]
        pub include_tags: Option<Vec<String>>,
        #[serde(default)]
        pub exclude_tags: Option<Vec<String>>,
        #[serde(default)]
        pub priorities: Option<Vec<Priority>>,
        #[serde(default)]
        pub categories: Option<Vec<String>>,
        #[serde(default = "default_true")]
        pub show_habits: bool,
        #[serde(default = "default_true")]
        pub show_done: bool,
        #[serde(default)]
        pub sort_by: Option<SortBy>,
        #[serde(default)]
        pub group_by: GroupBy,
        /// Vocabulary deciding which states count as done.
        #[serde(default)]
        pub todo_keywords: TodoKeywords,
    }

    impl AgendaViewConfig {
        pub fn new(start_date: NaiveDate, days: u32) -> Self {
            Self {
                view_type: None,
                start_date,
                days,
                todo_states: None,
                include_tags: None,
                exclude_tags: None,
                priorities: None,
                categories: None,
                show_habits: true,
                show_done: true,
                sort_by: None,
                group_by: GroupBy::Date,
                todo_keywords: TodoKeywords::default(),
            }
        }

        pub fn for_view(view_type: ViewType, start_date: NaiveDate) -> Self {
            Self {
                view_type: Some(view_type),
                ..Self::new(start_date, view_type.days_from(start_date))
            }
        }

        pub fn range(&self) -> AgendaRange {
            AgendaRange::new(self.start_date, self.days)
        }
    }

    /* ------------------------------- View output ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct AgendaGroup<'a> {
        pub key: String,
        pub label: Option<String>,
        pub items: Vec<AgendaItem<'a>>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct AgendaView<'a> {
        pub groups: Vec<AgendaGroup<'a>>,
        pub total_items: usize,
        pub config: AgendaViewConfig,
    }

}

pub mod timestamp {
    //! Resolving raw timestamp specs into calendar values.

    use crate::core::TimestampSpec;
    use chrono::{NaiveDate, NaiveDateTime};

    /// Resolve a spec to a local date-time; missing hour/minute default to 00:00.
    pub fn timestamp_to_date(spec: &TimestampSpec) -> Option<NaiveDateTime> {
        if spec.year == 0 && spec.month == 0 && spec.day == 0 {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(spec.year, spec.month, spec.day)?;
        date.and_hms_opt(spec.hour.unwrap_or(0), spec.minute.unwrap_or(0), 0)
    }

    /// `HH:MM`, only when the spec carries an hour.
    pub fn format_time(spec: &TimestampSpec) -> Option<String> {
        let hour = spec.hour?;
        Some(format!("{:02}:{:02}", hour, spec.minute.unwrap_or(0)))
    }

    pub fn format_repeater(spec: &TimestampSpec) -> Option<String> {
        spec.repeater.map(|r| r.to_string())
    }

    /// Whole days from `today` to `date`; negative when `date` is in the past.
    pub fn days_until(date: NaiveDate, today: NaiveDate) -> i64 {
        (date - today).num_days()
    }

}

pub mod walker {
    //! Pre-order traversal of the headline forest and planning-fact extraction.

    use crate::core::*;
    use log::debug;
    use std::path::Path;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PlanningKind {
        Scheduled,
        Deadline,
    }

    /// One SCHEDULED or DEADLINE timestamp of a headline, with its attribution.
    #[derive(Debug, Clone)]
    pub struct PlanningFact<'a> {
        pub headline: &'a HeadlineNode,
        pub kind: PlanningKind,
        pub timestamp: &'a TimestampSpec,
        pub file: String,
        pub category: Option<String>,
    }

    /// Pre-order iterator (parent before children) over a headline forest.
    /// Uses an explicit stack, so deep outlines cannot overflow the call stack.
    pub struct Headlines<'a> {
        stack: Vec<&'a HeadlineNode>,
    }

    impl<'a> Iterator for Headlines<'a> {
        type Item = &'a HeadlineNode;

        fn next(&mut self) -> Option<Self::Item> {
            let node = self.stack.pop()?;
            self.stack.extend(node.children.iter().rev());
            Some(node)
        }
    }

    pub fn headlines(forest: &[HeadlineNode]) -> Headlines<'_> {
        Headlines {
            stack: forest.iter().rev().collect(),
        }
    }

    pub fn attribute_file(h: &HeadlineNode, files: &FileIndex) -> String {
        files
            .lookup(h.line_number, &h.title)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| UNKNOWN_FILE.to_string())
    }

    /// Explicit `CATEGORY` property, else the attributed file's stem.
    pub fn attribute_category(h: &HeadlineNode, file: &str) -> Option<String> {
        if let Some(cat) = h.category() {
            return Some(cat.to_string());
        }
        if file == UNKNOWN_FILE {
            return None;
        }
        Path::new(file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }

    /// Extract every SCHEDULED and DEADLINE fact of the forest, in traversal order.
    pub fn walk_planning<'a>(forest: &'a [HeadlineNode], files: &FileIndex) -> Vec<PlanningFact<'a>> {
        let mut out = Vec::new();
        let mut visited = 0usize;
        for h in headlines(forest) {
            visited += 1;
            let Some(planning) = &h.planning else {
                continue;
            };
            if planning.scheduled.is_none() && planning.deadline.is_none() {
                continue;
            }
            let file = attribute_file(h, files);
            let category = attribute_category(h, &file);
            let present = [
                (PlanningKind::Scheduled, planning.scheduled.as_ref()),
                (PlanningKind::Deadline, planning.deadline.as_ref()),
            ];
            for (kind, ts) in present {
                if let Some(timestamp) = ts {
                    out.push(PlanningFact {
                        headline: h,
                        kind,
                        timestamp,
                        file: file.clone(),
                        category: category.clone(),
                    });
                }
            }
        }
        debug!("walked {} headlines, {} planning facts", visited, out.len());
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn forest() -> Vec<HeadlineNode> {
            vec![
                HeadlineNode::new(1, "Parent")
                    .scheduled(TimestampSpec::new(2024, 6, 3))
                    .with_child(
                        HeadlineNode::new(3, "Child")
                            .deadline(TimestampSpec::new(2024, 6, 5))
                            .with_child(HeadlineNode::new(5, "Grandchild")),
                    ),
                HeadlineNode::new(7, "Sibling")
                    .scheduled(TimestampSpec::new(2024, 6, 4))
                    .deadline(TimestampSpec::new(2024, 6, 6))
                    .closed(TimestampSpec::new(2024, 6, 2)),
            ]
        }

        #[test]
        fn traversal_is_pre_order() {
            let f = forest();
            let titles: Vec<&str> = headlines(&f).map(|h| h.title.as_str()).collect();
            assert_eq!(titles, vec!["Parent", "Child", "Grandchild", "Sibling"]);
        }

        #[test]
        fn one_fact_per_present_timestamp_and_closed_is_ignored() {
            let f = forest();
            let facts = walk_planning(&f, &FileIndex::default());
            let kinds: Vec<(&str, PlanningKind)> = facts
                .iter()
                .map(|f| (f.headline.title.as_str(), f.kind))
                .collect();
            assert_eq!(
                kinds,
                vec![
                    ("Parent", PlanningKind::Scheduled),
                    ("Child", PlanningKind::Deadline),
                    ("Sibling", PlanningKind::Scheduled),
                    ("Sibling", PlanningKind::Deadline),
                ]
            );
        }

        #[test]
        fn missing_attribution_is_unknown_without_category() {
            let f = forest();
            let facts = walk_planning(&f, &FileIndex::default());
            assert!(facts.iter().all(|f| f.file == UNKNOWN_FILE));
            assert!(facts.iter().all(|f| f.category.is_none()));
        }

        #[test]
        fn category_comes_from_property_then_file_stem() {
            let f = vec![
                HeadlineNode::new(1, "A").scheduled(TimestampSpec::new(2024, 6, 3)),
                HeadlineNode::new(4, "B")
                    .with_property("CATEGORY", "thesis")
                    .scheduled(TimestampSpec::new(2024, 6, 3)),
            ];
            let mut files = FileIndex::default();
            files.insert(1, "A", "/org/work.org");
            files.insert(4, "B", "/org/work.org");
            let facts = walk_planning(&f, &files);
            assert_eq!(facts[0].file, "/org/work.org");
            assert_eq!(facts[0].category.as_deref(), Some("work"));
            assert_eq!(facts[1].category.as_deref(), Some("thesis"));
        }

        #[test]
        fn deep_outline_does_not_recurse() {
            let mut node = HeadlineNode::new(100_000, "leaf").scheduled(TimestampSpec::new(2024, 6, 3));
            for line in (1..100_000).rev() {
                node = HeadlineNode::new(line, "level").with_child(node);
            }
            let forest = vec![node];
            assert_eq!(headlines(&forest).count(), 100_000);
            assert_eq!(walk_planning(&forest, &FileIndex::default()).len(), 1);
            // Dropping a 100k-deep tree recurses; leak it instead.
            std::mem::forget(forest);
        }
    }
}

pub mod filter {
    //! Predicate chain that prunes facts before they become agenda items.

    use crate::agenda::{AgendaItem, AgendaViewConfig};
    use crate::core::*;
    use crate::walker::PlanningFact;

    /// The fields the filter chain looks at.
    pub trait Filterable {
        fn todo_state(&self) -> Option<&str>;
        fn tags(&self) -> &[String];
        fn priority(&self) -> Option<Priority>;
        fn category(&self) -> Option<&str>;
    }

    impl Filterable for PlanningFact<'_> {
        fn todo_state(&self) -> Option<&str> {
            self.headline.todo_state.as_deref()
        }
        fn tags(&self) -> &[String] {
            &self.headline.tags
        }
        fn priority(&self) -> Option<Priority> {
            self.headline.priority
        }
        fn category(&self) -> Option<&str> {
            self.category.as_deref()
        }
    }

    impl Filterable for AgendaItem<'_> {
        fn todo_state(&self) -> Option<&str> {
            self.todo_state.as_deref()
        }
        fn tags(&self) -> &[String] {
            &self.tags
        }
        fn priority(&self) -> Option<Priority> {
            self.priority
        }
        fn category(&self) -> Option<&str> {
            self.category.as_deref()
        }
    }

    /// Which predicate dropped an item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Rejection {
        TodoState,
        Habit,
        Done,
        IncludeTags,
        ExcludeTags,
        Priority,
        Category,
    }

    pub const HABIT_TAG: &str = "HABIT";

    /// A filter set is active only when present and non-empty.
    pub fn active<T>(set: &Option<Vec<T>>) -> Option<&[T]> {
        set.as_deref().filter(|s| !s.is_empty())
    }

    pub fn state_allowed(states: Option<&[String]>, state: Option<&str>) -> bool {
        match states {
            None => true,
            Some(states) => state.is_some_and(|s| states.iter().any(|x| x == s)),
        }
    }

    pub fn shares_tag(tags: &[String], wanted: &[String]) -> bool {
        tags.iter().any(|t| wanted.contains(t))
    }

    pub fn is_closed(state: Option<&str>, keywords: &TodoKeywords) -> bool {
        state.is_some_and(|s| keywords.is_done(s))
    }

    pub struct ItemFilter<'c> {
        config: &'c AgendaViewConfig,
    }

    impl<'c> ItemFilter<'c> {
        pub fn new(config: &'c AgendaViewConfig) -> Self {
            Self { config }
        }

        pub fn check(&self, item: &impl Filterable) -> Result<(), Rejection> {
            let cfg = self.config;
            if !state_allowed(active(&cfg.todo_states), item.todo_state()) {
                return Err(Rejection::TodoState);
            }
            if !cfg.show_habits && item.tags().iter().any(|t| t == HABIT_TAG) {
                return Err(Rejection::Habit);
            }
            if !cfg.show_done && is_closed(item.todo_state(), &cfg.todo_keywords) {
                return Err(Rejection::Done);
            }
            if let Some(wanted) = active(&cfg.include_tags) {
                if !shares_tag(item.tags(), wanted) {
                    return Err(Rejection::IncludeTags);
                }
            }
            if let Some(unwanted) = active(&cfg.exclude_tags) {
                if shares_tag(item.tags(), unwanted) {
                    return Err(Rejection::ExcludeTags);
                }
            }
            if let Some(priorities) = active(&cfg.priorities) {
                if !item.priority().is_some_and(|p| priorities.contains(&p)) {
                    return Err(Rejection::Priority);
                }
            }
            if let Some(categories) = active(&cfg.categories) {
                if !item
                    .category()
                    .is_some_and(|c| categories.iter().any(|x| x == c))
                {
                    return Err(Rejection::Category);
                }
            }
            Ok(())
        }

        pub fn accepts(&self, item: &impl Filterable) -> bool {
            self.check(item).is_ok()
        }
    }

}

pub mod classify {
    //! Derives agenda items from planning facts relative to a window and "today".

    use crate::agenda::{AgendaItem, AgendaRange, AgendaType};
    use crate::timestamp::{days_until, format_repeater, format_time, timestamp_to_date};
    use crate::walker::{PlanningFact, PlanningKind};
    use chrono::NaiveDate;
    use log::trace;

    /// Classify one fact. `None` when the timestamp has no date or the item falls
    /// outside the window.
    ///
    /// Deadlines before today are overdue. An overdue deadline is listed under
    /// `today` whenever the window contains today; otherwise it shows on its own
    /// date if that date is in the window.
    pub fn classify<'a>(
        fact: &PlanningFact<'a>,
        range: &AgendaRange,
        today: NaiveDate,
    ) -> Option<AgendaItem<'a>> {
        let Some(resolved) = timestamp_to_date(fact.timestamp) else {
            trace!(
                "skipping {:?} of {:?}: timestamp has no date",
                fact.kind, fact.headline.title
            );
            return None;
        };
        let date = resolved.date();

        let (agenda_type, listed_on, days, overdue) = match fact.kind {
            PlanningKind::Scheduled => {
                if !range.contains(date) {
                    return None;
                }
                (AgendaType::Scheduled, date, None, None)
            }
            PlanningKind::Deadline => {
                let days = days_until(date, today);
                let overdue = days < 0;
                let listed_on = if overdue && range.contains(today) {
                    today
                } else if range.contains(date) {
                    date
                } else {
                    return None;
                };
                (AgendaType::Deadline, listed_on, Some(days), Some(overdue))
            }
        };

        let h = fact.headline;
        Some(AgendaItem {
            title: h.title.clone(),
            tags: h.tags.clone(),
            file: fact.file.clone(),
            line: h.line_number,
            headline: Some(h),
            agenda_type,
            category: fact.category.clone(),
            todo_state: h.todo_state.clone(),
            priority: h.priority,
            date: listed_on,
            time: format_time(fact.timestamp),
            days_until: days,
            overdue,
            repeater: format_repeater(fact.timestamp),
        })
    }

}

pub mod view {
    //! Agenda view assembly: walk, filter, classify, group, sort.

    use crate::agenda::*;
    use crate::classify::classify;
    use crate::core::*;
    use crate::filter::ItemFilter;
    use crate::format::format_date_label;
    use crate::walker::walk_planning;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use log::{debug, trace};
    use std::cmp::Ordering;

    pub const UNCATEGORIZED: &str = "Uncategorized";
    pub const NO_STATE: &str = "No State";
    pub const NO_PRIORITY: &str = "No Priority";
    pub const UNTAGGED: &str = "Untagged";

    /// Build an agenda view over `forest` for the window in `config`.
    pub fn generate_agenda_view<'a>(
        forest: &'a [HeadlineNode],
        files: &FileIndex,
        config: &AgendaViewConfig,
        today: NaiveDate,
    ) -> AgendaView<'a> {
        generate_agenda_view_with_diary(forest, files, config, today, Vec::new())
    }

    /// Same as `generate_agenda_view`, also placing caller-resolved diary items.
    pub fn generate_agenda_view_with_diary<'a>(
        forest: &'a [HeadlineNode],
        files: &FileIndex,
        config: &AgendaViewConfig,
        today: NaiveDate,
        diary: impl IntoIterator<Item = AgendaItem<'a>>,
    ) -> AgendaView<'a> {
        let range = config.range();
        let filter = ItemFilter::new(config);

        let mut items: Vec<AgendaItem<'a>> = Vec::new();
        for fact in walk_planning(forest, files) {
            if let Err(why) = filter.check(&fact) {
                trace!("filtered {:?} ({:?}): {:?}", fact.headline.title, fact.kind, why);
                continue;
            }
            items.extend(classify(&fact, &range, today));
        }
        items.extend(
            diary
                .into_iter()
                .filter(|item| range.contains(item.date) && filter.accepts(item)),
        );

        let mut groups = group_items(items, config, &range, today);
        for group in &mut groups {
            sort_items(&mut group.items, config.sort_by, &config.todo_keywords);
        }
        let total_items = groups.iter().map(|g| g.items.len()).sum();
        debug!(
            "agenda {} .. {}: {} groups, {} items",
            range.from,
            range.to,
            groups.len(),
            total_items
        );

        AgendaView {
            groups,
            total_items,
            config: config.clone(),
        }
    }

    pub fn date_key(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    /// Grouping key of an item for a non-date grouping. Tag grouping uses the first tag only.
    pub fn group_key(item: &AgendaItem<'_>, group_by: GroupBy) -> String {
        match group_by {
            GroupBy::Date => date_key(item.date),
            GroupBy::Category => item.category.as_deref().unwrap_or(UNCATEGORIZED).to_string(),
            GroupBy::Todo => item.todo_state.as_deref().unwrap_or(NO_STATE).to_string(),
            GroupBy::Priority => item
                .priority
                .map(|p| p.to_string())
                .unwrap_or_else(|| NO_PRIORITY.to_string()),
            GroupBy::Tag => item
                .tags
                .first()
                .map(String::as_str)
                .unwrap_or(UNTAGGED)
                .to_string(),
        }
    }

    fn group_items<'a>(
        items: Vec<AgendaItem<'a>>,
        config: &AgendaViewConfig,
        range: &AgendaRange,
        today: NaiveDate,
    ) -> Vec<AgendaGroup<'a>> {
        if config.group_by == GroupBy::Date {
            let mut groups: Vec<AgendaGroup<'a>> = range
                .days()
                .map(|day| AgendaGroup {
                    key: date_key(day),
                    label: Some(format_date_label(day, today)),
                    items: Vec::new(),
                })
                .collect();
            for item in items {
                let slot = usize::try_from((item.date - range.from).num_days())
                    .ok()
                    .and_then(|idx| groups.get_mut(idx));
                match slot {
                    Some(group) => group.items.push(item),
                    None => trace!("{:?} listed outside the window, dropped", item.title),
                }
            }
            return groups;
        }

        let mut buckets: IndexMap<String, Vec<AgendaItem<'a>>> = IndexMap::new();
        for item in items {
            buckets
                .entry(group_key(&item, config.group_by))
                .or_default()
                .push(item);
        }
        match config.group_by {
            GroupBy::Category => buckets.sort_keys(),
            GroupBy::Priority => buckets.sort_by(|a, _, b, _| {
                (a == NO_PRIORITY).cmp(&(b == NO_PRIORITY)).then_with(|| a.cmp(b))
            }),
            // first-seen order
            _ => {}
        }
        buckets
            .into_iter()
            .map(|(key, items)| AgendaGroup {
                key,
                label: None,
                items,
            })
            .collect()
    }

    fn missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Open states, then items without a state, then done states; alphabetical within each.
    fn todo_rank<'i>(item: &'i AgendaItem<'_>, keywords: &TodoKeywords) -> (u8, &'i str) {
        match item.todo_state.as_deref() {
            Some(s) if keywords.is_done(s) => (2, s),
            Some(s) => (0, s),
            None => (1, ""),
        }
    }

    /// Stable sort within one group; `None` keeps insertion order.
    pub fn sort_items(items: &mut [AgendaItem<'_>], sort_by: Option<SortBy>, keywords: &TodoKeywords) {
        let Some(sort_by) = sort_by else {
            return;
        };
        match sort_by {
            SortBy::Time => items.sort_by(|a, b| missing_last(a.time.as_deref(), b.time.as_deref())),
            SortBy::Priority => items.sort_by(|a, b| missing_last(a.priority, b.priority)),
            SortBy::Category => items.sort_by(|a, b| {
                let ca = a.category.as_deref().unwrap_or(UNCATEGORIZED);
                let cb = b.category.as_deref().unwrap_or(UNCATEGORIZED);
                ca.cmp(cb)
            }),
            SortBy::Todo => items.sort_by(|a, b| todo_rank(a, keywords).cmp(&todo_rank(b, keywords))),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn d(m: u32, day: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(2024, m, day).unwrap()
        }

        fn week() -> AgendaViewConfig {
            AgendaViewConfig::new(d(6, 1), 7)
        }

        fn titles<'v>(group: &'v AgendaGroup<'_>) -> Vec<&'v str> {
            group.items.iter().map(|i| i.title.as_str()).collect()
        }

        #[test]
        fn empty_forest_still_has_one_group_per_day() {
            let view = generate_agenda_view(&[], &FileIndex::default(), &week(), d(6, 1));
            assert_eq!(view.total_items, 0);
            assert_eq!(view.groups.len(), 7);
            assert_eq!(view.groups[0].key, "2024-06-01");
            assert_eq!(view.groups[6].key, "2024-06-07");
            assert!(view.groups.windows(2).all(|w| w[0].key < w[1].key));
        }

        #[test]
        fn scheduled_item_lands_in_its_day() {
            let forest = vec![
                HeadlineNode::new(1, "Draft chapter")
                    .with_todo("TODO")
                    .scheduled(TimestampSpec::new(2024, 6, 3).at(10, 0)),
            ];
            let view = generate_agenda_view(&forest, &FileIndex::default(), &week(), d(6, 1));
            assert_eq!(view.total_items, 1);
            let group = view.groups.iter().find(|g| !g.items.is_empty()).unwrap();
            assert_eq!(group.key, "2024-06-03");
            let item = &group.items[0];
            assert_eq!(item.agenda_type, AgendaType::Scheduled);
            assert_eq!(item.time.as_deref(), Some("10:00"));
            assert!(std::ptr::eq(item.headline.unwrap(), &forest[0]));
        }

        #[test]
        fn scheduled_and_deadline_yield_two_items() {
            let forest = vec![
                HeadlineNode::new(1, "Paper")
                    .scheduled(TimestampSpec::new(2024, 6, 3))
                    .deadline(TimestampSpec::new(2024, 6, 5)),
            ];
            let view = generate_agenda_view(&forest, &FileIndex::default(), &week(), d(6, 1));
            assert_eq!(view.total_items, 2);
            let types: Vec<AgendaType> = view
                .groups
                .iter()
                .flat_map(|g| g.items.iter().map(|i| i.agenda_type))
                .collect();
            assert_eq!(types, vec![AgendaType::Scheduled, AgendaType::Deadline]);
        }

        #[test]
        fn time_sort_orders_morning_first_regardless_of_input() {
            let forest = vec![
                HeadlineNode::new(1, "afternoon").scheduled(TimestampSpec::new(2024, 6, 3).at(14, 0)),
                HeadlineNode::new(2, "untimed").scheduled(TimestampSpec::new(2024, 6, 3)),
                HeadlineNode::new(3, "morning").scheduled(TimestampSpec::new(2024, 6, 3).at(9, 0)),
            ];
            let config = AgendaViewConfig {
                sort_by: Some(SortBy::Time),
                ..week()
            };
            let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
            assert_eq!(titles(&view.groups[2]), vec!["morning", "afternoon", "untimed"]);
        }

        #[test]
        fn hiding_habits_keeps_untagged_items() {
            let forest = vec![
                HeadlineNode::new(1, "Run")
                    .with_tags(["HABIT"])
                    .scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(2, "Read").scheduled(TimestampSpec::new(2024, 6, 2)),
            ];
            let config = AgendaViewConfig {
                show_habits: false,
                ..week()
            };
            let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
            assert_eq!(view.total_items, 1);
            assert_eq!(titles(&view.groups[1]), vec!["Read"]);
        }

        #[test]
        fn overdue_deadline_surfaces_only_when_today_is_visible() {
            let forest = vec![HeadlineNode::new(1, "Late").deadline(TimestampSpec::new(2024, 5, 20))];
            let view = generate_agenda_view(&forest, &FileIndex::default(), &week(), d(6, 4));
            assert_eq!(view.total_items, 1);
            let today = view.groups.iter().find(|g| g.key == "2024-06-04").unwrap();
            assert_eq!(today.items[0].overdue, Some(true));
            assert!(today.items[0].days_until.unwrap() < 0);

            let later = generate_agenda_view(&forest, &FileIndex::default(), &week(), d(6, 20));
            assert_eq!(later.total_items, 0);
            assert_eq!(later.groups.len(), 7);
        }

        #[test]
        fn total_matches_group_sizes_for_every_grouping() {
            let forest = vec![
                HeadlineNode::new(1, "a")
                    .with_todo("TODO")
                    .with_priority('B')
                    .with_tags(["x", "y"])
                    .scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(2, "b")
                    .with_todo("DONE")
                    .deadline(TimestampSpec::new(2024, 6, 6)),
                HeadlineNode::new(3, "c").scheduled(TimestampSpec::new(2024, 6, 9)),
            ];
            for group_by in [GroupBy::Date, GroupBy::Category, GroupBy::Todo, GroupBy::Priority, GroupBy::Tag] {
                let config = AgendaViewConfig { group_by, ..week() };
                let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
                let sum: usize = view.groups.iter().map(|g| g.items.len()).sum();
                assert_eq!(view.total_items, sum, "{group_by:?}");
                assert_eq!(view.total_items, 2, "{group_by:?}");
                if group_by != GroupBy::Date {
                    assert!(view.groups.iter().all(|g| !g.items.is_empty()));
                }
            }
        }

        #[test]
        fn tag_grouping_uses_first_tag_only() {
            let forest = vec![
                HeadlineNode::new(1, "both")
                    .with_tags(["a", "b"])
                    .scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(2, "bare").scheduled(TimestampSpec::new(2024, 6, 2)),
            ];
            let config = AgendaViewConfig {
                group_by: GroupBy::Tag,
                ..week()
            };
            let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
            let keys: Vec<&str> = view.groups.iter().map(|g| g.key.as_str()).collect();
            assert_eq!(keys, vec!["a", UNTAGGED]);
        }

        #[test]
        fn category_groups_are_alphabetical() {
            let forest = vec![
                HeadlineNode::new(1, "w")
                    .with_property("CATEGORY", "work")
                    .scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(2, "t")
                    .with_property("CATEGORY", "thesis")
                    .scheduled(TimestampSpec::new(2024, 6, 3)),
                HeadlineNode::new(3, "none").scheduled(TimestampSpec::new(2024, 6, 3)),
            ];
            let config = AgendaViewConfig {
                group_by: GroupBy::Category,
                ..week()
            };
            let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
            let keys: Vec<&str> = view.groups.iter().map(|g| g.key.as_str()).collect();
            assert_eq!(keys, vec!["Uncategorized", "thesis", "work"]);
        }

        #[test]
        fn priority_groups_put_missing_priority_last() {
            let forest = vec![
                HeadlineNode::new(1, "none").scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(2, "c").with_priority('C').scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(3, "a").with_priority('A').scheduled(TimestampSpec::new(2024, 6, 2)),
            ];
            let config = AgendaViewConfig {
                group_by: GroupBy::Priority,
                ..week()
            };
            let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
            let keys: Vec<&str> = view.groups.iter().map(|g| g.key.as_str()).collect();
            assert_eq!(keys, vec!["A", "C", NO_PRIORITY]);
        }

        #[test]
        fn priority_sort_puts_missing_last() {
            let forest = vec![
                HeadlineNode::new(1, "none").scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(2, "b").with_priority('B').scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(3, "a").with_priority('A').scheduled(TimestampSpec::new(2024, 6, 2)),
            ];
            let config = AgendaViewConfig {
                sort_by: Some(SortBy::Priority),
                ..week()
            };
            let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
            assert_eq!(titles(&view.groups[1]), vec!["a", "b", "none"]);
        }

        #[test]
        fn todo_sort_puts_open_states_before_done() {
            let forest = vec![
                HeadlineNode::new(1, "done").with_todo("DONE").scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(2, "wip").with_todo("WIP").scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(3, "plain").scheduled(TimestampSpec::new(2024, 6, 2)),
                HeadlineNode::new(4, "todo").with_todo("TODO").scheduled(TimestampSpec::new(2024, 6, 2)),
            ];
            let config = AgendaViewConfig {
                sort_by: Some(SortBy::Todo),
                ..week()
            };
            let view = generate_agenda_view(&forest, &FileIndex::default(), &config, d(6, 1));
            assert_eq!(titles(&view.groups[1]), vec!["todo", "wip", "plain", "done"]);
        }

        #[test]
        fn combined_filters_equal_intersection_of_single_rules() {
            let item = |line, title: &str, todo: Option<&str>, prio: Option<char>, tags: &[&str], cat: &str| {
                let mut h = HeadlineNode::new(line, title)
                    .with_tags(tags.iter().copied())
                    .with_property("CATEGORY", cat)
                    .scheduled(TimestampSpec::new(2024, 6, 2));
                if let Some(t) = todo {
                    h = h.with_todo(t);
                }
                if let Some(p) = prio {
                    h = h.with_priority(p);
                }
                h
            };
            let forest = vec![
                item(1, "keep", Some("TODO"), Some('A'), &["work"], "job"),
                item(2, "wrong state", Some("WAIT"), Some('A'), &["work"], "job"),
                item(3, "no state", None, Some('A'), &["work"], "job"),
                item(4, "wrong tag", Some("TODO"), Some('A'), &["home"], "job"),
                item(5, "excluded", Some("TODO"), Some('A'), &["work", "later"], "job"),
                item(6, "low priority", Some("TODO"), Some('C'), &["work"], "job"),
                item(7, "other category", Some("TODO"), Some('A'), &["work"], "home"),
                item(8, "fails twice", Some("WAIT"), None, &["home"], "job"),
            ];
            let single_rules = [
                AgendaViewConfig { todo_states: Some(vec!["TODO".into()]), ..week() },
                AgendaViewConfig { include_tags: Some(vec!["work".into()]), ..week() },
                AgendaViewConfig { exclude_tags: Some(vec!["later".into()]), ..week() },
                AgendaViewConfig { priorities: Some(vec![Priority('A')]), ..week() },
                AgendaViewConfig { categories: Some(vec!["job".into()]), ..week() },
            ];
            let survivors = |config: &AgendaViewConfig| -> Vec<String> {
                generate_agenda_view(&forest, &FileIndex::default(), config, d(6, 1))
                    .groups
                    .into_iter()
                    .flat_map(|g| g.items.into_iter().map(|i| i.title))
                    .collect()
            };

            let mut intersection = survivors(&week());
            for config in &single_rules {
                let kept = survivors(config);
                assert!(kept.len() < forest.len(), "{config:?} should drop something");
                intersection.retain(|t| kept.contains(t));
            }

            let combined = AgendaViewConfig {
                todo_states: single_rules[0].todo_states.clone(),
                include_tags: single_rules[1].include_tags.clone(),
                exclude_tags: single_rules[2].exclude_tags.clone(),
                priorities: single_rules[3].priorities.clone(),
                categories: single_rules[4].categories.clone(),
                ..week()
            };
            assert_eq!(survivors(&combined), intersection);
            assert_eq!(intersection, vec!["keep"]);
        }

        #[test]
        fn diary_items_are_windowed_and_grouped() {
            let diary = vec![
                AgendaItem::diary("Anniversary", d(6, 4), Some(5)),
                AgendaItem::diary("Out of range", d(7, 4), None),
            ];
            let view = generate_agenda_view_with_diary(&[], &FileIndex::default(), &week(), d(6, 1), diary);
            assert_eq!(view.total_items, 1);
            assert_eq!(titles(&view.groups[3]), vec!["Anniversary"]);
        }

        #[test]
        fn date_group_labels_name_today() {
            let view = generate_agenda_view(&[], &FileIndex::default(), &week(), d(6, 3));
            assert_eq!(view.groups[2].label.as_deref(), Some("Today (Monday, June 3, 2024)"));
            assert_eq!(view.config, week());
        }
    }
}

pub mod todo {
    //! TODO list: every headline with a TODO keyword, bucketed by state and priority.
    //! No date window applies.

    use crate::core::*;
    use crate::filter::{active, is_closed, shares_tag, state_allowed};
    use crate::timestamp::{days_until, timestamp_to_date};
    use crate::walker::{attribute_category, attribute_file, headlines};
    use chrono::{NaiveDate, NaiveDateTime};
    use indexmap::IndexMap;
    use log::debug;
    use serde::{Deserialize, Serialize};

    /// Priority bucket for headlines without a priority cookie.
    pub const NO_PRIORITY_BUCKET: &str = "None";

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TodoListOptions {
        #[serde(default)]
        pub states: Option<Vec<String>>,
        #[serde(default)]
        pub tags: Option<Vec<String>>,
        #[serde(default)]
        pub exclude_done: bool,
        #[serde(default)]
        pub todo_keywords: TodoKeywords,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct TodoListItem<'a> {
        pub title: String,
        pub todo_state: String,
        pub priority: Option<Priority>,
        pub tags: Vec<String>,
        pub category: Option<String>,
        pub file: String,
        pub line: usize,
        #[serde(skip)]
        pub headline: &'a HeadlineNode,
        pub scheduled: Option<NaiveDateTime>,
        pub deadline: Option<NaiveDateTime>,
        /// Days until the deadline, when there is one.
        pub days_until: Option<i64>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct TodoCounts {
        pub total: usize,
        pub by_state: IndexMap<String, usize>,
        pub by_priority: IndexMap<String, usize>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct TodoList<'a> {
        /// States in first-seen order.
        pub by_state: IndexMap<String, Vec<TodoListItem<'a>>>,
        /// Priorities alphabetically, `"None"` last.
        pub by_priority: IndexMap<String, Vec<TodoListItem<'a>>>,
        pub counts: TodoCounts,
    }

    pub fn generate_todo_list<'a>(
        forest: &'a [HeadlineNode],
        files: &FileIndex,
        options: &TodoListOptions,
        today: NaiveDate,
    ) -> TodoList<'a> {
        let states = active(&options.states);
        let tags = active(&options.tags);

        let mut items = Vec::new();
        for h in headlines(forest) {
            let Some(state) = h.todo_state.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };
            if !state_allowed(states, Some(state)) {
                continue;
            }
            if options.exclude_done && is_closed(Some(state), &options.todo_keywords) {
                continue;
            }
            if let Some(wanted) = tags {
                if !shares_tag(&h.tags, wanted) {
                    continue;
                }
            }
            items.push(todo_item(h, state, files, today));
        }

        let mut list = TodoList::default();
        for item in &items {
            list.by_state
                .entry(item.todo_state.clone())
                .or_default()
                .push(item.clone());
            let bucket = item
                .priority
                .map(|p| p.to_string())
                .unwrap_or_else(|| NO_PRIORITY_BUCKET.to_string());
            list.by_priority.entry(bucket).or_default().push(item.clone());
        }
        list.by_priority.sort_by(|a, _, b, _| {
            (a == NO_PRIORITY_BUCKET)
                .cmp(&(b == NO_PRIORITY_BUCKET))
                .then_with(|| a.cmp(b))
        });

        list.counts = TodoCounts {
            total: items.len(),
            by_state: list
                .by_state
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
            by_priority: list
                .by_priority
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
        };
        debug!(
            "todo list: {} items in {} states",
            list.counts.total,
            list.by_state.len()
        );
        list
    }

    fn todo_item<'a>(h: &'a HeadlineNode, state: &str, files: &FileIndex, today: NaiveDate) -> TodoListItem<'a> {
        let file = attribute_file(h, files);
        let category = attribute_category(h, &file);
        let planning = h.planning.as_ref();
        let scheduled = planning
            .and_then(|p| p.scheduled.as_ref())
            .and_then(timestamp_to_date);
        let deadline = planning
            .and_then(|p| p.deadline.as_ref())
            .and_then(timestamp_to_date);
        TodoListItem {
            title: h.title.clone(),
            todo_state: state.to_string(),
            priority: h.priority,
            tags: h.tags.clone(),
            category,
            file,
            line: h.line_number,
            headline: h,
            scheduled,
            deadline,
            days_until: deadline.map(|dl| days_until(dl.date(), today)),
        }
    }

}

pub mod format {
    //! Plain-text rendering of agenda views and TODO lists.

    use crate::agenda::{AgendaItem, AgendaType, AgendaView};
    use crate::todo::TodoList;
    use chrono::NaiveDate;
    use std::fmt::Write;

    /// `Today (…)`, `Tomorrow (…)`, `Yesterday (…)`, else the full date.
    pub fn format_date_label(date: NaiveDate, today: NaiveDate) -> String {
        let full = date.format("%A, %B %-d, %Y").to_string();
        match (date - today).num_days() {
            0 => format!("Today ({full})"),
            1 => format!("Tomorrow ({full})"),
            -1 => format!("Yesterday ({full})"),
            _ => full,
        }
    }

    fn headline_tail(parts: &mut Vec<String>, item: &AgendaItem<'_>) {
        if let Some(state) = &item.todo_state {
            parts.push(state.clone());
        }
        if let Some(p) = item.priority {
            parts.push(format!("[#{p}]"));
        }
        if !item.title.is_empty() {
            parts.push(item.title.clone());
        }
        if !item.tags.is_empty() {
            parts.push(format!(":{}:", item.tags.join(":")));
        }
    }

    /// One agenda row. Deadlines read `In N d.:` with N the absolute day
    /// distance, or `Deadline:` on the day itself.
    pub fn format_agenda_item(item: &AgendaItem<'_>) -> String {
        let mut parts = Vec::new();
        match item.agenda_type {
            AgendaType::Diary => {
                return match item.days_until {
                    Some(years) => format!("({years} years) {}", item.title),
                    None => format!("Sexp: {}", item.title),
                };
            }
            AgendaType::Scheduled => {
                parts.extend(item.time.clone());
                parts.push("Scheduled:".to_string());
            }
            AgendaType::Deadline => {
                parts.extend(item.time.clone());
                match item.days_until {
                    Some(n) if n != 0 => parts.push(format!("In {} d.:", n.abs())),
                    _ => parts.push("Deadline:".to_string()),
                }
            }
        }
        headline_tail(&mut parts, item);
        if let Some(r) = &item.repeater {
            parts.push(format!("({r})"));
        }
        match &item.category {
            Some(cat) => format!("{cat}: {}", parts.join(" ")),
            None => parts.join(" "),
        }
    }

    pub fn format_agenda_view(view: &AgendaView<'_>) -> String {
        let range = view.config.range();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Agenda for {} - {}",
            range.from.format("%b %-d"),
            range.to.format("%b %-d, %Y")
        );
        for group in &view.groups {
            out.push('\n');
            let _ = writeln!(out, "{}", group.label.as_deref().unwrap_or(&group.key));
            for item in &group.items {
                let _ = writeln!(out, "  {}", format_agenda_item(item));
            }
        }
        let _ = writeln!(out, "\nTotal: {} items", view.total_items);
        out
    }

    pub fn format_todo_list(list: &TodoList<'_>) -> String {
        let mut out = String::new();
        for (state, items) in &list.by_state {
            let _ = writeln!(out, "{state} ({})", items.len());
            for item in items {
                let mut line = String::from("  ");
                if let Some(p) = item.priority {
                    let _ = write!(line, "[#{p}] ");
                }
                line.push_str(&item.title);
                if !item.tags.is_empty() {
                    let _ = write!(line, " :{}:", item.tags.join(":"));
                }
                if let Some(dl) = item.deadline {
                    let _ = write!(line, "  DEADLINE {}", dl.date());
                }
                if let Some(cat) = &item.category {
                    let _ = write!(line, "  ({cat})");
                }
                let _ = writeln!(out, "{line}");
            }
            out.push('\n');
        }
        let _ = writeln!(out, "Total: {} items", list.counts.total);
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::agenda::AgendaViewConfig;
        use crate::core::*;
        use crate::todo::{TodoListOptions, generate_todo_list};
        use crate::view::generate_agenda_view;

        fn d(m: u32, day: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(2024, m, day).unwrap()
        }

        fn item(agenda_type: AgendaType) -> AgendaItem<'static> {
            AgendaItem {
                title: "Write intro".into(),
                tags: vec!["thesis".into(), "draft".into()],
                file: "/org/phd.org".into(),
                line: 3,
                headline: None,
                agenda_type,
                category: Some("phd".into()),
                todo_state: Some("TODO".into()),
                priority: Some(Priority('A')),
                date: d(6, 3),
                time: Some("09:30".into()),
                days_until: None,
                overdue: None,
                repeater: None,
            }
        }

        #[test]
        fn scheduled_row() {
            assert_eq!(
                format_agenda_item(&item(AgendaType::Scheduled)),
                "phd: 09:30 Scheduled: TODO [#A] Write intro :thesis:draft:"
            );
        }

        #[test]
        fn deadline_rows_use_absolute_days() {
            let mut it = item(AgendaType::Deadline);
            it.time = None;
            it.days_until = Some(-3);
            assert_eq!(format_agenda_item(&it), "phd: In 3 d.: TODO [#A] Write intro :thesis:draft:");
            it.days_until = Some(4);
            assert!(format_agenda_item(&it).starts_with("phd: In 4 d.:"));
            it.days_until = Some(0);
            assert!(format_agenda_item(&it).starts_with("phd: Deadline: TODO"));
        }

        #[test]
        fn diary_rows() {
            let it = AgendaItem::diary("Wedding", d(6, 3), Some(7));
            assert_eq!(format_agenda_item(&it), "(7 years) Wedding");
            let it = AgendaItem::diary("Full moon", d(6, 3), None);
            assert_eq!(format_agenda_item(&it), "Sexp: Full moon");
        }

        #[test]
        fn date_labels() {
            assert_eq!(format_date_label(d(6, 4), d(6, 3)), "Tomorrow (Tuesday, June 4, 2024)");
            assert_eq!(format_date_label(d(6, 2), d(6, 3)), "Yesterday (Sunday, June 2, 2024)");
            assert_eq!(format_date_label(d(6, 9), d(6, 3)), "Sunday, June 9, 2024");
        }

        #[test]
        fn view_header_and_total() {
            let forest = vec![HeadlineNode::new(1, "Call").scheduled(TimestampSpec::new(2024, 6, 2).at(8, 0))];
            let view = generate_agenda_view(&forest, &FileIndex::default(), &AgendaViewConfig::new(d(6, 1), 7), d(6, 1));
            let text = format_agenda_view(&view);
            assert!(text.starts_with("Agenda for Jun 1 - Jun 7, 2024\n"));
            assert!(text.contains("Tomorrow (Sunday, June 2, 2024)\n  08:00 Scheduled: Call\n"));
            assert!(text.ends_with("Total: 1 items\n"));
        }

        #[test]
        fn todo_list_report() {
            let forest = vec![
                HeadlineNode::new(1, "Outline").with_todo("TODO").with_priority('B'),
                HeadlineNode::new(2, "Ship").with_todo("DONE"),
            ];
            let list = generate_todo_list(&forest, &FileIndex::default(), &TodoListOptions::default(), d(6, 3));
            let text = format_todo_list(&list);
            assert!(text.contains("TODO (1)\n  [#B] Outline\n"));
            assert!(text.contains("DONE (1)\n  Ship\n"));
            assert!(text.ends_with("Total: 2 items\n"));
        }
    }
}

pub mod parser {
    //! Minimal Org parser built on `nom`, reading only what the agenda needs:
    //! in-buffer TODO sequences, headlines, planning lines and property drawers.
    //! Section bodies are skipped.

    use crate::core::*;
    use anyhow::{Context, Result, anyhow};
    use log::debug;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while1, take_while_m_n},
        character::complete::{char, digit1, not_line_ending, one_of, satisfy, space0, space1},
        combinator::{eof, map_opt, map_res, opt, value, verify},
        error::{VerboseError, VerboseErrorKind},
        sequence::{delimited, preceded, terminated, tuple},
    };
    use serde::Serialize;
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    /// A parsed `.org` file: its headline forest and TODO vocabulary.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct OrgDocument {
        pub path: Option<PathBuf>,
        pub todo_keywords: TodoKeywords,
        pub headlines: Vec<HeadlineNode>,
    }

    impl OrgDocument {
        /// Record every headline of this document under its path.
        pub fn register(&self, files: &mut FileIndex) {
            let Some(path) = &self.path else {
                return;
            };
            for h in crate::walker::headlines(&self.headlines) {
                files.insert(h.line_number, &h.title, path.clone());
            }
        }
    }

    /* ------------------------ Public entry points ------------------------ */

    /// Parse an Org document from a string. `base` seeds the TODO vocabulary;
    /// in-buffer `#+TODO:` lines extend it.
    pub fn parse_org_document(
        path: Option<PathBuf>,
        input: &str,
        base: &TodoKeywords,
    ) -> Result<OrgDocument> {
        let mut keywords = base.clone();
        for line in input.lines() {
            if let Ok((_, (key, val))) = parse_hash_key_value(line) {
                if ["TODO", "SEQ_TODO", "TYP_TODO"]
                    .iter()
                    .any(|k| key.eq_ignore_ascii_case(k))
                {
                    keywords.add_sequence(val.split_whitespace());
                }
            }
        }

        let mut stack: Vec<(usize, HeadlineNode)> = Vec::new();
        let mut roots: Vec<HeadlineNode> = Vec::new();
        let mut in_drawer = false;

        for (idx, line) in input.lines().enumerate() {
            let line_number = idx + 1;
            if is_heading_line(line) {
                if in_drawer {
                    debug!("line {line_number}: heading closes an unterminated property drawer");
                    in_drawer = false;
                }
                let (_, (level, node)) = parse_headline(line, line_number, &keywords)
                    .map_err(to_anyhow("headline"))
                    .with_context(|| format!("line {line_number}"))?;
                close_until(&mut stack, &mut roots, level);
                stack.push((level, node));
                continue;
            }

            // preamble
            let Some((_, current)) = stack.last_mut() else {
                continue;
            };

            let trimmed = line.trim_start();
            if in_drawer {
                if trimmed.trim_end() == ":END:" {
                    in_drawer = false;
                } else if let Ok((_, (k, v))) = parse_property_line(line) {
                    current.properties.insert(k.to_string(), v.trim().to_string());
                } else {
                    debug!("line {line_number}: leaving unterminated property drawer");
                    in_drawer = false;
                }
                continue;
            }

            if ["SCHEDULED:", "DEADLINE:", "CLOSED:"]
                .iter()
                .any(|k| trimmed.starts_with(k))
            {
                match parse_planning_line(trimmed) {
                    Ok((_, p)) => merge_planning(current, p),
                    Err(e) => debug!(
                        "line {line_number}: ignoring planning line: {}",
                        to_anyhow("planning")(e)
                    ),
                }
                continue;
            }

            if trimmed.trim_end() == ":PROPERTIES:" {
                in_drawer = true;
            }
        }
        close_until(&mut stack, &mut roots, 0);

        Ok(OrgDocument {
            path,
            todo_keywords: keywords,
            headlines: roots,
        })
    }

    /// Read and parse one file from disk.
    pub fn parse_org_file(path: &Path, base: &TodoKeywords) -> Result<OrgDocument> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        parse_org_document(Some(path.to_path_buf()), &text, base)
    }

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn to_anyhow(label: &'static str) -> impl Fn(nom::Err<VerboseError<&str>>) -> anyhow::Error {
        move |e| match e {
            nom::Err::Error(ve) | nom::Err::Failure(ve) => {
                let msg = pretty_verbose_error(label, ve);
                anyhow!(msg)
            }
            nom::Err::Incomplete(_) => anyhow!("incomplete input while parsing {}", label),
        }
    }

    fn pretty_verbose_error(label: &str, ve: VerboseError<&str>) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        let _ = writeln!(s, "parse error in {}:", label);
        for (frag, kind) in ve.errors {
            let _ = writeln!(s, "  at: {:?}  {:?}", frag, kind);
        }
        s
    }

    /* ------------------------------- Tree ------------------------------- */

    /// Pop every open headline at `level` or deeper, attaching each to its parent.
    fn close_until(stack: &mut Vec<(usize, HeadlineNode)>, roots: &mut Vec<HeadlineNode>, level: usize) {
        while stack.last().is_some_and(|(l, _)| *l >= level) {
            let Some((_, node)) = stack.pop() else {
                break;
            };
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(node),
                None => roots.push(node),
            }
        }
    }

    fn merge_planning(node: &mut HeadlineNode, p: PlanningInfo) {
        let planning = node.planning.get_or_insert_with(Default::default);
        if p.scheduled.is_some() {
            planning.scheduled = p.scheduled;
        }
        if p.deadline.is_some() {
            planning.deadline = p.deadline;
        }
        if p.closed.is_some() {
            planning.closed = p.closed;
        }
    }

    fn is_heading_line(s: &str) -> bool {
        // one-or-more '*' then a space
        let rest = s.trim_start_matches('*');
        rest.len() < s.len() && rest.starts_with(' ')
    }

    fn is_tag_char(c: char) -> bool {
        c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '%')
    }

    /* ----------------------------- Headlines ----------------------------- */

    fn parse_hash_key_value(i: &str) -> PResult<'_, (&str, &str)> {
        // #+key: value
        let (i, _) = tag("#+")(i)?;
        let (i, key) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(i)?;
        let (i, _) = tag(":")(i)?;
        let (i, _) = space0(i)?;
        let (i, val) = not_line_ending(i)?;
        Ok((i, (key, val)))
    }

    /// Parse a single headline line into its level and node.
    fn parse_headline<'a>(
        i: &'a str,
        line_number: usize,
        keywords: &TodoKeywords,
    ) -> PResult<'a, (usize, HeadlineNode)> {
        let (i, stars) = take_while1(|c: char| c == '*')(i)?;
        let (i, _) = space1(i)?;

        let (i, todo) = opt(terminated(
            verify(
                take_while1(|c: char| !c.is_whitespace()),
                |w: &str| keywords.is_keyword(w),
            ),
            alt((space1, eof)),
        ))(i)?;

        let (i, priority) = opt(terminated(
            delimited(tag("[#"), satisfy(|c| c.is_ascii_alphanumeric()), char(']')),
            space0,
        ))(i)?;

        let (i, text) = not_line_ending(i)?;
        let (title, tags) = split_tags(text);

        let node = HeadlineNode {
            title: title.to_string(),
            todo_state: todo.map(str::to_string),
            priority: priority.map(Priority),
            tags,
            line_number,
            ..Default::default()
        };
        Ok((i, (stars.len(), node)))
    }

    /// Split trailing `:a:b:` tags off a headline title.
    fn split_tags(text: &str) -> (&str, Vec<String>) {
        let text = text.trim_end();
        let start = text
            .rfind(|c: char| c == ' ' || c == '\t')
            .map(|p| p + 1)
            .unwrap_or(0);
        let trail = &text[start..];
        let is_tags = trail.len() > 1
            && trail.starts_with(':')
            && trail.ends_with(':')
            && trail[1..trail.len() - 1]
                .split(':')
                .all(|t| !t.is_empty() && t.chars().all(is_tag_char));
        if !is_tags {
            return (text, vec![]);
        }
        let mut tags: Vec<String> = Vec::new();
        for t in trail.split(':').filter(|t| !t.is_empty()) {
            if !tags.iter().any(|x| x == t) {
                tags.push(t.to_string());
            }
        }
        (text[..start].trim_end(), tags)
    }

    /* --------------------------- Planning & Drawers --------------------------- */

    fn keyword_timestamp(keyword: &'static str) -> impl Fn(&str) -> PResult<'_, TimestampSpec> {
        move |i: &str| {
            let (i, _) = space0(i)?;
            let (i, _) = tag(keyword)(i)?;
            let (i, _) = space0(i)?;
            parse_timestamp(i)
        }
    }

    fn parse_planning_line(line: &str) -> PResult<'_, PlanningInfo> {
        // e.g.: SCHEDULED: <2025-11-15 12:00 +1w> DEADLINE: <...>  CLOSED: [2025-11-15 14:10]
        let mut rest = line;
        let mut matched = false;
        let mut p = PlanningInfo::default();

        while !rest.trim().is_empty() {
            if let Ok((r, ts)) = keyword_timestamp("SCHEDULED:")(rest) {
                p.scheduled = Some(ts);
                rest = r;
                matched = true;
                continue;
            }
            if let Ok((r, ts)) = keyword_timestamp("DEADLINE:")(rest) {
                p.deadline = Some(ts);
                rest = r;
                matched = true;
                continue;
            }
            if let Ok((r, ts)) = keyword_timestamp("CLOSED:")(rest) {
                p.closed = Some(ts);
                rest = r;
                matched = true;
                continue;
            }
            return Err(nom::Err::Error(VerboseError {
                errors: vec![(rest, VerboseErrorKind::Context("planning"))],
            }));
        }

        if !matched {
            return Err(nom::Err::Error(VerboseError {
                errors: vec![(line, VerboseErrorKind::Context("planning-empty"))],
            }));
        }
        Ok((rest, p))
    }

    fn parse_property_line(i: &str) -> PResult<'_, (&str, &str)> {
        //  :KEY: value
        let (i, _) = space0(i)?;
        let (i, _) = char(':')(i)?;
        let (i, key) = take_while1(|c: char| c != ':' && !c.is_whitespace())(i)?;
        let (i, _) = char(':')(i)?;
        let (i, _) = space0(i)?;
        let (i, val) = not_line_ending(i)?;
        Ok((i, (key, val)))
    }

    /* ----------------------------- Timestamps ----------------------------- */

    fn parse_timestamp(i: &str) -> PResult<'_, TimestampSpec> {
        // Active: <YYYY-MM-DD Dow HH:MM +1w -2d>
        // Inactive: [YYYY-MM-DD Dow HH:MM]
        let (i, open) = one_of("<[")(i)?;
        let (i, (year, _, month, _, day)) = tuple((
            map_res(take_while_m_n(4, 4, |c: char| c.is_ascii_digit()), str::parse::<i32>),
            char('-'),
            map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), str::parse::<u32>),
            char('-'),
            map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), str::parse::<u32>),
        ))(i)?;
        let (i, _) = opt(preceded(space1, take_while1(|c: char| c.is_alphabetic())))(i)?; // day of week; ignored
        let (i, time) = opt(preceded(space1, terminated(parse_time, opt(preceded(char('-'), parse_time)))))(i)?;
        let (i, repeater) = opt(preceded(space1, terminated(parse_repeater, opt(parse_habit_interval))))(i)?;
        let (i, _) = opt(preceded(space1, parse_delay))(i)?;
        let (i, _) = space0(i)?;
        let (i, _) = char(if open == '<' { '>' } else { ']' })(i)?;

        let ts = TimestampSpec {
            year,
            month,
            day,
            hour: time.map(|(h, _)| h),
            minute: time.map(|(_, m)| m),
            repeater,
        };
        Ok((i, ts))
    }

    fn parse_time(i: &str) -> PResult<'_, (u32, u32)> {
        let (i, (h, _, m)) = tuple((
            map_res(take_while_m_n(1, 2, |c: char| c.is_ascii_digit()), str::parse::<u32>),
            char(':'),
            map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), str::parse::<u32>),
        ))(i)?;
        Ok((i, (h, m)))
    }

    fn parse_repeater(i: &str) -> PResult<'_, Repeater> {
        let (i, (kind, value, unit)) = tuple((
            alt((
                value(RepeaterKind::FromBase, tag("++")),
                value(RepeaterKind::FromNow, tag(".+")),
                value(RepeaterKind::FromLast, tag("+")),
            )),
            map_res(digit1, str::parse::<u32>),
            map_opt(one_of("hdwmy"), RepeaterUnit::from_char),
        ))(i)?;
        Ok((i, Repeater { kind, value, unit }))
    }

    fn parse_habit_interval(i: &str) -> PResult<'_, ()> {
        // org-habit upper bound: `.+2d/4d`
        value((), tuple((char('/'), digit1, one_of("hdwmy"))))(i)
    }

    fn parse_delay(i: &str) -> PResult<'_, ()> {
        // -2d / --2d warning period
        value((), tuple((alt((tag("--"), tag("-"))), digit1, one_of("hdwmy"))))(i)
    }

}

pub mod config {
    //! Settings file for the binary: TODO vocabulary and view defaults.

    use crate::agenda::{GroupBy, MAX_VIEW_DAYS, SortBy, ViewType};
    use crate::core::TodoKeywords;
    use serde::{Deserialize, Serialize};
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("reading settings file {path:?}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("parsing settings file {path:?}")]
        Json {
            path: PathBuf,
            #[source]
            source: serde_json::Error,
        },
        #[error("todo keyword {0:?} is listed as both open and done")]
        ConflictingKeyword(String),
        #[error("days must be between 1 and {}", MAX_VIEW_DAYS)]
        InvalidDays,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Settings {
        pub todo_keywords: TodoKeywords,
        pub view: Option<ViewType>,
        pub days: Option<u32>,
        pub group_by: Option<GroupBy>,
        pub sort_by: Option<SortBy>,
    }

    impl Settings {
        pub fn validate(&self) -> Result<(), ConfigError> {
            if self.days.is_some_and(|d| d == 0 || d > MAX_VIEW_DAYS) {
                return Err(ConfigError::InvalidDays);
            }
            if let Some(dup) = self
                .todo_keywords
                .open
                .iter()
                .find(|k| self.todo_keywords.done.contains(k))
            {
                return Err(ConfigError::ConflictingKeyword(dup.clone()));
            }
            Ok(())
        }
    }

    pub fn parse_settings(text: &str, path: &Path) -> Result<Settings, ConfigError> {
        let settings: Settings = serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_settings(&text, path)
    }

}

pub use agenda::{AgendaGroup, AgendaItem, AgendaType, AgendaView, AgendaViewConfig, GroupBy, SortBy, ViewType};
pub use format::{format_agenda_item, format_agenda_view, format_date_label, format_todo_list};
pub use parser::{OrgDocument, parse_org_document, parse_org_file};
pub use timestamp::timestamp_to_date;
pub use todo::{TodoList, TodoListOptions, generate_todo_list};
pub use view::{generate_agenda_view, generate_agenda_view_with_diary};
