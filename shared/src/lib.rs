use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Schema version stamped on settings and every persisted expense
pub const SCHEMA_VERSION: &str = "2.1";

/// Version written into backup envelopes
pub const EXPORT_VERSION: &str = "2.1";

/// The closed set of category labels an expense may carry
pub const CATEGORIES: &[&str] = &[
    "食費",
    "日用品",
    "住居費",
    "水道光熱費",
    "通信費",
    "交通費",
    "医療費",
    "娯楽費",
    "交際費",
    "教育費",
    "衣服・美容",
    "その他",
];

pub fn is_known_category(category: &str) -> bool {
    CATEGORIES.contains(&category)
}

/// Stable identifier of the household member who paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PayerId {
    #[serde(rename = "member1")]
    Member1,
    #[serde(rename = "member2")]
    Member2,
}

impl PayerId {
    pub const ALL: [PayerId; 2] = [PayerId::Member1, PayerId::Member2];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayerId::Member1 => "member1",
            PayerId::Member2 => "member2",
        }
    }

    /// Parse the wire form; surrounding whitespace is ignored
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "member1" => Some(PayerId::Member1),
            "member2" => Some(PayerId::Member2),
            _ => None,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            PayerId::Member1 => PayerId::Member2,
            PayerId::Member2 => PayerId::Member1,
        }
    }
}

impl fmt::Display for PayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar month identifier, serialized as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=9999).contains(&year) && (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// Parse an exact `YYYY-MM` string (no trimming, no single-digit months)
    pub fn parse(raw: &str) -> Option<Self> {
        let bytes = raw.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return None;
        }
        if !bytes[..4].iter().chain(&bytes[5..]).all(u8::is_ascii_digit) {
            return None;
        }
        let year = raw[..4].parse().ok()?;
        let month = raw[5..].parse().ok()?;
        Self::new(year, month)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// The `count` months ending with (and including) this one, oldest first
    pub fn trailing(&self, count: usize) -> Vec<MonthKey> {
        let mut months = Vec::with_capacity(count);
        let mut cursor = *self;
        for _ in 0..count {
            months.push(cursor);
            cursor = cursor.previous();
        }
        months.reverse();
        months
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MonthKey::parse(s).ok_or_else(|| format!("Invalid month key: {}", s))
    }
}

impl TryFrom<String> for MonthKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

/// One spending event, fully normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub description: String,
    /// Whole currency units, 1..=10,000,000
    pub amount: i64,
    pub category: String,
    pub payer_id: Option<PayerId>,
    /// Free-text payer kept only when it could not be resolved to a payer id
    pub payer_legacy: Option<String>,
    pub date: NaiveDate,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub schema_version: String,
    pub fingerprint: String,
}

/// Amount as typed by a user or found in a backup: a number or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(f64),
    Text(String),
}

impl From<f64> for AmountInput {
    fn from(value: f64) -> Self {
        AmountInput::Number(value)
    }
}

impl From<&str> for AmountInput {
    fn from(value: &str) -> Self {
        AmountInput::Text(value.to_string())
    }
}

/// Raw expense form input before validation and payer resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDraft {
    pub description: String,
    pub amount: AmountInput,
    pub category: String,
    #[serde(default)]
    pub payer_id: Option<String>,
    /// Free-text payer name, used when no payer id is given
    #[serde(default)]
    pub payer: Option<String>,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayNames {
    pub member1: String,
    pub member2: String,
}

impl DisplayNames {
    pub fn new(member1: impl Into<String>, member2: impl Into<String>) -> Self {
        Self {
            member1: member1.into(),
            member2: member2.into(),
        }
    }

    pub fn name_for(&self, payer: PayerId) -> &str {
        match payer {
            PayerId::Member1 => &self.member1,
            PayerId::Member2 => &self.member2,
        }
    }
}

impl Default for DisplayNames {
    fn default() -> Self {
        Self::new("ユーザー1", "ユーザー2")
    }
}

/// Mapping from every display name ever used to the member it referred to
pub type PayerAliases = BTreeMap<String, PayerId>;

/// Month-key → category → non-negative budget ceiling
pub type MonthlyBudgets = BTreeMap<MonthKey, BTreeMap<String, i64>>;

/// A user-confirmed "we settled up" receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub amount: f64,
    pub from_payer_id: PayerId,
    pub to_payer_id: PayerId,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClosureStatus {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSnapshot {
    pub amount: f64,
    pub from_payer_id: PayerId,
    pub to_payer_id: PayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TotalsSnapshot {
    pub member1_total: i64,
    pub member2_total: i64,
    pub invalid_payer_total: i64,
    pub total_expense: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReopenEntry {
    pub reopened_at: DateTime<Utc>,
    pub reason: String,
}

/// Explicit soft lock on one month's ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonthClosure {
    pub status: ClosureStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub settlement_snapshot: Option<SettlementSnapshot>,
    pub totals_snapshot: Option<TotalsSnapshot>,
    #[serde(default)]
    pub reopen_history: Vec<ReopenEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub suggestions_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            suggestions_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsMeta {
    pub schema_version: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub data_revision: u64,
}

impl Default for SettingsMeta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            updated_at: None,
            data_revision: 0,
        }
    }
}

/// The single settings aggregate of a household account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub display_names: DisplayNames,
    pub payer_aliases: PayerAliases,
    pub settlements: BTreeMap<MonthKey, SettlementRecord>,
    pub month_closures: BTreeMap<MonthKey, MonthClosure>,
    pub preferences: Preferences,
    pub meta: SettingsMeta,
}

impl Default for Settings {
    fn default() -> Self {
        let display_names = DisplayNames::default();
        let mut payer_aliases = PayerAliases::new();
        payer_aliases.insert(display_names.member1.clone(), PayerId::Member1);
        payer_aliases.insert(display_names.member2.clone(), PayerId::Member2);
        Self {
            display_names,
            payer_aliases,
            settlements: BTreeMap::new(),
            month_closures: BTreeMap::new(),
            preferences: Preferences::default(),
            meta: SettingsMeta::default(),
        }
    }
}

/// Complete current state handed to the UI after every read or mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub expenses: Vec<Expense>,
    pub settings: Settings,
    pub monthly_budgets: MonthlyBudgets,
}

/// Versioned backup/export payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEnvelope {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub settings: Settings,
    pub monthly_budgets: MonthlyBudgets,
    pub expenses: Vec<Expense>,
}

/// Aggregated amounts over a set of expenses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub member1_total: i64,
    pub member2_total: i64,
    /// Spending whose payer could not be resolved; excluded from settlement
    pub invalid_payer_total: i64,
    pub total_expense: i64,
    pub category_totals: BTreeMap<String, i64>,
}

impl Totals {
    pub fn total_for(&self, payer: PayerId) -> i64 {
        match payer {
            PayerId::Member1 => self.member1_total,
            PayerId::Member2 => self.member2_total,
        }
    }

    pub fn snapshot(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            member1_total: self.member1_total,
            member2_total: self.member2_total,
            invalid_payer_total: self.invalid_payer_total,
            total_expense: self.total_expense,
        }
    }
}

/// Live-computed transfer that equalizes both members' spending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub amount: f64,
    pub fair_share: f64,
    pub from: Option<PayerId>,
    pub to: Option<PayerId>,
    pub from_name: Option<String>,
    pub to_name: Option<String>,
    pub message: String,
}

impl Settlement {
    pub fn is_even(&self) -> bool {
        self.from.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyKpis {
    pub month: MonthKey,
    pub spent: i64,
    pub previous_spent: i64,
    pub budget_total: i64,
    pub budget_delta: i64,
    pub month_over_month_delta: i64,
    pub settlement_forecast: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub category: String,
    pub budget: i64,
    pub spent: i64,
    pub remaining: i64,
    pub over_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthCategoryTotals {
    pub month: MonthKey,
    pub totals: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDelta {
    pub category: String,
    pub previous: i64,
    pub current: i64,
    pub difference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SixMonthTrend {
    pub months: Vec<MonthCategoryTotals>,
    pub top_increases: Vec<CategoryDelta>,
    pub top_decreases: Vec<CategoryDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyCheck {
    /// False when fewer than the required number of historical samples exist
    pub evaluable: bool,
    pub is_anomaly: bool,
    pub sample_count: usize,
    pub median: Option<f64>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringSuggestion {
    pub description: String,
    pub category: String,
    pub payer_id: PayerId,
    pub suggested_amount: i64,
    pub occurrence_count: usize,
    pub last_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    pub search_term: String,
    pub is_searching: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub dry_run: bool,
    pub skip_duplicates: bool,
    pub chunk_size: usize,
    /// Positions in the payload's expense list admitted even when they are duplicates
    #[serde(default)]
    pub allow_duplicate_indices: BTreeSet<usize>,
    pub merge_budgets: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_duplicates: true,
            chunk_size: 500,
            allow_duplicate_indices: BTreeSet::new(),
            merge_budgets: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecordError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub dry_run: bool,
    pub imported_count: usize,
    pub failed_count: usize,
    pub duplicate_count: usize,
    pub skipped_duplicate_count: usize,
    /// Records admitted with an unresolved free-text payer
    pub legacy_payer_count: usize,
    pub batch_count: usize,
    pub errors: Vec<ImportRecordError>,
}
