use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

use crate::feed::{fields, FeatureRecord};
use crate::util::truncate_chars;

/// Kind of change recorded in the change log.
///
/// Always derived from which field changed, except `NewFeature`, which
/// means no snapshot existed for the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeType {
    NewFeature,
    DateChange,
    WaveChange,
    DescriptionChange,
    StatusChange,
}

impl ChangeType {
    /// Storage spelling
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::NewFeature => "new_feature",
            ChangeType::DateChange => "date_change",
            ChangeType::WaveChange => "wave_change",
            ChangeType::DescriptionChange => "description_change",
            ChangeType::StatusChange => "status_change",
        }
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            ChangeType::NewFeature => "New Feature",
            ChangeType::DateChange => "Date Changed",
            ChangeType::WaveChange => "Wave Changed",
            ChangeType::DescriptionChange => "Description Updated",
            ChangeType::StatusChange => "Status Changed",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_feature" => Ok(ChangeType::NewFeature),
            "date_change" => Ok(ChangeType::DateChange),
            "wave_change" => Ok(ChangeType::WaveChange),
            "description_change" => Ok(ChangeType::DescriptionChange),
            "status_change" => Ok(ChangeType::StatusChange),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

/// Fields compared between a snapshot and a fresh record, in comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedField {
    GaDate,
    PublicPreviewDate,
    EarlyAccessDate,
    GaReleaseWave,
    PublicPreviewReleaseWave,
    EnabledFor,
    BusinessValue,
    FeatureDetails,
    InvestmentArea,
}

impl TrackedField {
    pub const ALL: [TrackedField; 9] = [
        TrackedField::GaDate,
        TrackedField::PublicPreviewDate,
        TrackedField::EarlyAccessDate,
        TrackedField::GaReleaseWave,
        TrackedField::PublicPreviewReleaseWave,
        TrackedField::EnabledFor,
        TrackedField::BusinessValue,
        TrackedField::FeatureDetails,
        TrackedField::InvestmentArea,
    ];

    /// Upstream field name, as stored in `field_changed`
    pub fn name(self) -> &'static str {
        match self {
            TrackedField::GaDate => fields::GA_DATE,
            TrackedField::PublicPreviewDate => fields::PUBLIC_PREVIEW_DATE,
            TrackedField::EarlyAccessDate => fields::EARLY_ACCESS_DATE,
            TrackedField::GaReleaseWave => fields::GA_RELEASE_WAVE,
            TrackedField::PublicPreviewReleaseWave => fields::PUBLIC_PREVIEW_RELEASE_WAVE,
            TrackedField::EnabledFor => fields::ENABLED_FOR,
            TrackedField::BusinessValue => fields::BUSINESS_VALUE,
            TrackedField::FeatureDetails => fields::FEATURE_DETAILS,
            TrackedField::InvestmentArea => fields::INVESTMENT_AREA,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn change_type(self) -> ChangeType {
        match self {
            TrackedField::GaDate
            | TrackedField::PublicPreviewDate
            | TrackedField::EarlyAccessDate => ChangeType::DateChange,
            TrackedField::GaReleaseWave | TrackedField::PublicPreviewReleaseWave => {
                ChangeType::WaveChange
            }
            TrackedField::BusinessValue | TrackedField::FeatureDetails => {
                ChangeType::DescriptionChange
            }
            TrackedField::EnabledFor | TrackedField::InvestmentArea => ChangeType::StatusChange,
        }
    }

    /// The comparison text for this field: trimmed, with dates rendered as
    /// `YYYY-MM-DD` and absent dates as empty.
    pub fn value_of(self, record: &FeatureRecord) -> String {
        let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        match self {
            TrackedField::GaDate => date(record.ga_date),
            TrackedField::PublicPreviewDate => date(record.public_preview_date),
            TrackedField::EarlyAccessDate => date(record.early_access_date),
            TrackedField::GaReleaseWave => record.ga_wave.trim().to_string(),
            TrackedField::PublicPreviewReleaseWave => record.preview_wave.trim().to_string(),
            TrackedField::EnabledFor => record.enabled_for.trim().to_string(),
            TrackedField::BusinessValue => record.business_value.trim().to_string(),
            TrackedField::FeatureDetails => record.feature_details.trim().to_string(),
            TrackedField::InvestmentArea => record.investment_area.trim().to_string(),
        }
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One tracked field that differs between two records (untruncated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: TrackedField,
    pub old_value: String,
    pub new_value: String,
}

/// Compares every tracked field of `old` against `new`, in field order.
pub fn diff_records(old: &FeatureRecord, new: &FeatureRecord) -> Vec<FieldChange> {
    TrackedField::ALL
        .into_iter()
        .filter_map(|field| {
            let old_value = field.value_of(old);
            let new_value = field.value_of(new);
            (old_value != new_value).then_some(FieldChange {
                field,
                old_value,
                new_value,
            })
        })
        .collect()
}

/// An immutable change-log fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub release_plan_id: String,
    pub feature_name: String,
    pub product_name: String,
    pub change_type: ChangeType,
    pub field_changed: Option<TrackedField>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new_feature(record: &FeatureRecord, detected_at: DateTime<Utc>) -> Self {
        Self {
            release_plan_id: record.id.clone(),
            feature_name: record.feature_name.clone(),
            product_name: record.product_name.clone(),
            change_type: ChangeType::NewFeature,
            field_changed: None,
            old_value: None,
            new_value: None,
            detected_at,
        }
    }

    /// Builds a field-level event, cutting both values to `max_len` chars.
    pub fn field_change(
        record: &FeatureRecord,
        change: &FieldChange,
        max_len: usize,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            release_plan_id: record.id.clone(),
            feature_name: record.feature_name.clone(),
            product_name: record.product_name.clone(),
            change_type: change.field.change_type(),
            field_changed: Some(change.field),
            old_value: Some(truncate_chars(&change.old_value, max_len).into_owned()),
            new_value: Some(truncate_chars(&change.new_value, max_len).into_owned()),
            detected_at,
        }
    }
}
