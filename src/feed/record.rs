use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::normalize::{clean_html, parse_date, value_text};

/// One release-plan object exactly as the upstream feed delivered it
pub type RawFeature = Map<String, Value>;

/// Upstream field names. These are the vendor's schema and must match
/// byte for byte, including capitalization.
pub mod fields {
    pub const FEATURE_NAME: &str = "Feature name";
    pub const PRODUCT_NAME: &str = "Product name";
    pub const PRODUCT_ID: &str = "ProductId";
    pub const RELEASE_PLAN_ID: &str = "Release Plan ID";
    pub const GA_DATE: &str = "GA date";
    pub const PUBLIC_PREVIEW_DATE: &str = "Public preview date";
    pub const EARLY_ACCESS_DATE: &str = "Early access date";
    pub const GA_RELEASE_WAVE: &str = "GA Release Wave";
    pub const PUBLIC_PREVIEW_RELEASE_WAVE: &str = "Public Preview Release Wave";
    pub const INVESTMENT_AREA: &str = "Investment area";
    pub const BUSINESS_VALUE: &str = "Business value";
    pub const FEATURE_DETAILS: &str = "Feature details";
    pub const ENABLED_FOR: &str = "Enabled for";
    pub const LAST_UPDATED: &str = "Last Gitcommit date";
}

const SEARCH_BASE: &str = "https://releaseplans.microsoft.com/en-us/";

/// Lifecycle stage derived from a feature's dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    GenerallyAvailable,
    PublicPreview,
    EarlyAccess,
    Planned,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::GenerallyAvailable,
        Status::PublicPreview,
        Status::EarlyAccess,
        Status::Planned,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Status::GenerallyAvailable => "Generally Available",
            Status::PublicPreview => "Public Preview",
            Status::EarlyAccess => "Early Access",
            Status::Planned => "Planned",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized release-plan entry.
///
/// `id` is the identity used by change detection; every other field is
/// comparison payload. Status and days-to-GA are deliberately not stored:
/// they depend on "today" and are recomputed from the dates on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureRecord {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub feature_name: String,
    pub investment_area: String,
    pub business_value: String,
    pub feature_details: String,
    pub enabled_for: String,
    pub early_access_date: Option<NaiveDate>,
    pub public_preview_date: Option<NaiveDate>,
    pub ga_date: Option<NaiveDate>,
    pub last_updated_date: Option<NaiveDate>,
    pub preview_wave: String,
    pub ga_wave: String,
}

impl FeatureRecord {
    /// Normalizes one raw feed object.
    ///
    /// Missing keys become empty strings or `None`; this never fails, so a
    /// record without a usable date is still displayable.
    pub fn from_raw(raw: &RawFeature) -> Self {
        let text = |key: &str| raw.get(key).map(value_text).unwrap_or_default();
        let html = |key: &str| clean_html(&text(key));
        let date = |key: &str| parse_date(&text(key));

        Self {
            id: text(fields::RELEASE_PLAN_ID).trim().to_string(),
            product_id: text(fields::PRODUCT_ID).trim().to_string(),
            product_name: html(fields::PRODUCT_NAME),
            feature_name: html(fields::FEATURE_NAME),
            investment_area: html(fields::INVESTMENT_AREA),
            business_value: html(fields::BUSINESS_VALUE),
            feature_details: html(fields::FEATURE_DETAILS),
            enabled_for: html(fields::ENABLED_FOR),
            early_access_date: date(fields::EARLY_ACCESS_DATE),
            public_preview_date: date(fields::PUBLIC_PREVIEW_DATE),
            ga_date: date(fields::GA_DATE),
            last_updated_date: date(fields::LAST_UPDATED),
            preview_wave: text(fields::PUBLIC_PREVIEW_RELEASE_WAVE).trim().to_string(),
            ga_wave: text(fields::GA_RELEASE_WAVE).trim().to_string(),
        }
    }

    /// Derives the lifecycle stage as of `today`.
    ///
    /// GA wins whenever the GA date has passed, even if the preview date is
    /// later (inconsistent upstream data is tolerated, not corrected).
    pub fn status(&self, today: NaiveDate) -> Status {
        let reached = |d: Option<NaiveDate>| d.is_some_and(|d| d <= today);

        if reached(self.ga_date) {
            Status::GenerallyAvailable
        } else if reached(self.public_preview_date) {
            Status::PublicPreview
        } else if reached(self.early_access_date) {
            Status::EarlyAccess
        } else {
            Status::Planned
        }
    }

    /// Days from `today` until GA; negative once GA has passed.
    pub fn days_to_ga(&self, today: NaiveDate) -> Option<i64> {
        self.ga_date.map(|ga| (ga - today).num_days())
    }

    /// The GA wave when known, otherwise the preview wave.
    pub fn release_wave(&self) -> &str {
        if self.ga_wave.is_empty() {
            &self.preview_wave
        } else {
            &self.ga_wave
        }
    }

    /// Link to the release planner site searching for this feature.
    pub fn search_link(&self) -> String {
        let app = self
            .product_name
            .replace("Dynamics 365 ", "")
            .replace("Microsoft ", "");
        url::Url::parse_with_params(
            SEARCH_BASE,
            &[("app", app.trim()), ("q", self.feature_name.as_str())],
        )
        .map(String::from)
        .unwrap_or_else(|_| SEARCH_BASE.to_string())
    }

    /// Whether this record can take part in change detection.
    pub fn is_trackable(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Orders records by their last upstream edit, newest first. Records without
/// a parseable edit date go last; ties keep feed order.
pub fn sort_by_last_updated(records: &mut [FeatureRecord]) {
    records.sort_by(|a, b| b.last_updated_date.cmp(&a.last_updated_date));
}

/// Returns true if a raw object carries a non-empty feature name, the
/// minimum for it to count as a release-plan entry.
pub fn looks_like_feature(raw: &RawFeature) -> bool {
    raw.get(fields::FEATURE_NAME)
        .map(value_text)
        .is_some_and(|name| !name.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn date(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn record_with(
        early: Option<&str>,
        preview: Option<&str>,
        ga: Option<&str>,
    ) -> FeatureRecord {
        FeatureRecord {
            early_access_date: early.and_then(date),
            public_preview_date: preview.and_then(date),
            ga_date: ga.and_then(date),
            ..Default::default()
        }
    }

    fn raw(value: Value) -> RawFeature {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_sort_by_last_updated_newest_first() {
        let mut records: Vec<FeatureRecord> = [
            ("old", Some("2024-11-02")),
            ("undated", None),
            ("new", Some("2025-05-20")),
            ("also-old", Some("2024-11-02")),
        ]
        .into_iter()
        .map(|(id, updated)| FeatureRecord {
            id: id.into(),
            last_updated_date: updated.and_then(date),
            ..Default::default()
        })
        .collect();

        sort_by_last_updated(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "also-old", "undated"]);
    }

    #[test]
    fn test_status_ga_wins_over_future_preview() {
        let r = record_with(None, Some("2025-09-01"), Some("2025-05-01"));
        assert_eq!(r.status(today()), Status::GenerallyAvailable);
    }

    #[test]
    fn test_status_ga_on_today_is_ga() {
        let r = record_with(None, None, Some("2025-06-01"));
        assert_eq!(r.status(today()), Status::GenerallyAvailable);
    }

    #[test]
    fn test_status_public_preview() {
        let r = record_with(None, Some("2025-05-01"), Some("2025-10-01"));
        assert_eq!(r.status(today()), Status::PublicPreview);

        let r = record_with(None, Some("2025-05-01"), None);
        assert_eq!(r.status(today()), Status::PublicPreview);
    }

    #[test]
    fn test_status_early_access() {
        let r = record_with(Some("2025-04-01"), Some("2025-08-01"), None);
        assert_eq!(r.status(today()), Status::EarlyAccess);
    }

    #[test]
    fn test_status_planned() {
        let r = record_with(Some("2025-07-01"), Some("2025-08-01"), Some("2025-10-01"));
        assert_eq!(r.status(today()), Status::Planned);
        assert_eq!(FeatureRecord::default().status(today()), Status::Planned);
    }

    #[test]
    fn test_days_to_ga() {
        let r = record_with(None, None, Some("2025-06-11"));
        assert_eq!(r.days_to_ga(today()), Some(10));
        let r = record_with(None, None, Some("2025-05-22"));
        assert_eq!(r.days_to_ga(today()), Some(-10));
        assert_eq!(FeatureRecord::default().days_to_ga(today()), None);
    }

    #[test]
    fn test_from_raw_normalizes_fields() {
        let r = FeatureRecord::from_raw(&raw(json!({
            "Release Plan ID": " 7f3a ",
            "Product name": "Dynamics 365 Sales",
            "Feature name": "<p>Copilot <b>summaries</b></p>",
            "Business value": "Saves &amp; time",
            "GA date": "10/1/2025",
            "Public preview date": "TBD",
            "Early access date": null,
            "GA Release Wave": " 2025 release wave 2 ",
            "ProductId": 1234,
        })));

        assert_eq!(r.id, "7f3a");
        assert_eq!(r.product_id, "1234");
        assert_eq!(r.feature_name, "Copilot summaries");
        assert_eq!(r.business_value, "Saves & time");
        assert_eq!(r.ga_date, date("2025-10-01"));
        assert_eq!(r.public_preview_date, None);
        assert_eq!(r.early_access_date, None);
        assert_eq!(r.ga_wave, "2025 release wave 2");
        assert_eq!(r.enabled_for, "");
    }

    #[test]
    fn test_release_wave_prefers_ga() {
        let mut r = FeatureRecord {
            preview_wave: "2025 release wave 1".into(),
            ..Default::default()
        };
        assert_eq!(r.release_wave(), "2025 release wave 1");
        r.ga_wave = "2025 release wave 2".into();
        assert_eq!(r.release_wave(), "2025 release wave 2");
    }

    #[test]
    fn test_search_link_strips_vendor_prefix() {
        let r = FeatureRecord {
            product_name: "Dynamics 365 Customer Service".into(),
            feature_name: "Unified routing".into(),
            ..Default::default()
        };
        let link = r.search_link();
        assert!(link.starts_with(SEARCH_BASE));
        assert!(link.contains("app=Customer+Service"));
        assert!(link.contains("q=Unified+routing"));
    }

    #[test]
    fn test_looks_like_feature() {
        assert!(looks_like_feature(&raw(json!({"Feature name": "X"}))));
        assert!(!looks_like_feature(&raw(json!({"Feature name": "  "}))));
        assert!(!looks_like_feature(&raw(json!({"Product name": "X"}))));
    }

    #[test]
    fn test_record_serde_keeps_dates() {
        let r = record_with(Some("2025-01-02"), None, Some("2025-03-04"));
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"2025-03-04\""));
        let back: FeatureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
