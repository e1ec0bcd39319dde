use crate::survey::*;

use serde::{Deserialize, Serialize};

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "reportTitle")]
    pub report_title: Option<String>,
    #[serde(rename = "reportSuffix")]
    pub report_suffix: Option<String>,
    #[serde(rename = "outputDirectory")]
    pub output_directory: Option<String>,
    #[serde(rename = "cleanedFileName")]
    pub cleaned_file_name: Option<String>,
}

impl OutputSettings {
    pub const DEFAULT_TITLE: &'static str = "Duplicate responses";

    pub fn title(&self) -> String {
        let base = self
            .report_title
            .clone()
            .unwrap_or_else(|| OutputSettings::DEFAULT_TITLE.to_string());
        match &self.report_suffix {
            Some(suffix) if !suffix.trim().is_empty() => format!("{} – {}", base, suffix.trim()),
            _ => base,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    /// csv, xlsx or arcgis_json
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "excelWorksheetName")]
    pub excel_worksheet_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldSettings {
    #[serde(rename = "timeField")]
    pub time_field: Option<String>,
    #[serde(rename = "fallbackTimeField")]
    pub fallback_time_field: Option<String>,
    #[serde(rename = "contentFields")]
    pub content_fields: Option<Vec<String>>,
    #[serde(rename = "excludedFields")]
    pub excluded_fields: Option<Vec<String>>,
    #[serde(rename = "multiValueMarker")]
    pub multi_value_marker: Option<String>,
    #[serde(rename = "multiValueFields")]
    pub multi_value_fields: Option<Vec<String>>,
    #[serde(rename = "latField")]
    pub lat_field: Option<String>,
    #[serde(rename = "lonField")]
    pub lon_field: Option<String>,
}

impl FieldSettings {
    pub const DEFAULT_TIME_FIELD: &'static str = "CreationDate";
    pub const DEFAULT_FALLBACK_TIME_FIELD: &'static str = "EditDate";

    /// The configured time field if the table has it, otherwise the fallback.
    ///
    /// When neither is present, the primary name is returned and the analysis
    /// reports it as missing.
    pub fn time_field_for(&self, table: &Table) -> String {
        let primary = self
            .time_field
            .clone()
            .unwrap_or_else(|| FieldSettings::DEFAULT_TIME_FIELD.to_string());
        if table.has_field(&primary) {
            return primary;
        }
        let fallback = if self.time_field.is_some() {
            self.fallback_time_field.clone()
        } else {
            Some(
                self.fallback_time_field
                    .clone()
                    .unwrap_or_else(|| FieldSettings::DEFAULT_FALLBACK_TIME_FIELD.to_string()),
            )
        };
        match fallback {
            Some(f) if table.has_field(&f) => {
                info!(
                    "time_field_for: {:?} is not in the table, using {:?}",
                    primary, f
                );
                f
            }
            _ => primary,
        }
    }

    pub fn lat_field_for(&self, table: &Table) -> String {
        coordinate_field(&self.lat_field, "y", GEOMETRY_LAT_FIELD, table)
    }

    pub fn lon_field_for(&self, table: &Table) -> String {
        coordinate_field(&self.lon_field, "x", GEOMETRY_LON_FIELD, table)
    }
}

// The configured column, else the Survey123 default, else the point geometry
// of a feature query.
fn coordinate_field(
    configured: &Option<String>,
    default: &str,
    geometry: &str,
    table: &Table,
) -> String {
    match configured {
        Some(name) => name.clone(),
        None if !table.has_field(default) && table.has_field(geometry) => geometry.to_string(),
        None => default.to_string(),
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleSettings {
    #[serde(rename = "windowMinutes")]
    pub _window_minutes: Option<JSValue>,
    #[serde(rename = "keepPolicy")]
    pub _keep_policy: Option<String>,
    #[serde(rename = "proximityThresholdMeters")]
    pub proximity_threshold_meters: Option<f64>,
}

impl RuleSettings {
    pub fn window_minutes(&self) -> SurveyResult<i64> {
        match &self._window_minutes {
            None => Ok(DedupRules::DEFAULT_WINDOW_MINUTES),
            x => read_js_int(x),
        }
    }

    pub fn keep_policy(&self) -> SurveyResult<KeepPolicy> {
        match &self._keep_policy {
            None => Ok(KeepPolicy::MostRecent),
            Some(s) => parse_keep_policy(s),
        }
    }
}

pub fn parse_keep_policy(s: &str) -> SurveyResult<KeepPolicy> {
    match s {
        "mostRecent" | "most_recent" => Ok(KeepPolicy::MostRecent),
        "oldest" => Ok(KeepPolicy::Oldest),
        _ => whatever!("unknown keep policy: {}", s),
    }
}

pub fn keep_policy_name(policy: KeepPolicy) -> &'static str {
    match policy {
        KeepPolicy::MostRecent => "mostRecent",
        KeepPolicy::Oldest => "oldest",
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(rename = "outputSettings")]
    pub output_settings: OutputSettings,
    #[serde(rename = "dataSources")]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub fields: FieldSettings,
    #[serde(default)]
    pub rules: RuleSettings,
}

pub fn read_config(path: &str) -> SurveyResult<SurveyConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: SurveyConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(config)
}

pub fn read_reference(path: &str) -> SurveyResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}

// Minutes may be written as numbers or as strings in the exported configurations.
fn read_js_int(x: &Option<JSValue>) -> SurveyResult<i64> {
    match x {
        Some(JSValue::Number(n)) => n.as_i64().context(ParsingJsonNumberSnafu {
            value: n.to_string(),
        }),
        Some(JSValue::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .context(ParsingJsonNumberSnafu { value: s.clone() }),
        other => None.context(ParsingJsonNumberSnafu {
            value: format!("{:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use survey_dedup::builder::TableBuilder;

    fn rules_from(js: &str) -> RuleSettings {
        serde_json::from_str(js).unwrap()
    }

    #[test]
    fn window_as_number_or_string() {
        assert_eq!(rules_from(r#"{"windowMinutes": 15}"#).window_minutes().unwrap(), 15);
        assert_eq!(rules_from(r#"{"windowMinutes": "5"}"#).window_minutes().unwrap(), 5);
        assert_eq!(rules_from("{}").window_minutes().unwrap(), 10);
        assert!(rules_from(r#"{"windowMinutes": "ten"}"#)
            .window_minutes()
            .is_err());
    }

    #[test]
    fn keep_policies() {
        assert_eq!(rules_from("{}").keep_policy().unwrap(), KeepPolicy::MostRecent);
        assert_eq!(
            rules_from(r#"{"keepPolicy": "oldest"}"#)
                .keep_policy()
                .unwrap(),
            KeepPolicy::Oldest
        );
        assert!(rules_from(r#"{"keepPolicy": "random"}"#)
            .keep_policy()
            .is_err());
    }

    #[test]
    fn title_with_suffix() {
        let os = OutputSettings {
            report_title: Some("Progress report".to_string()),
            report_suffix: Some(" North district ".to_string()),
            output_directory: None,
            cleaned_file_name: None,
        };
        assert_eq!(os.title(), "Progress report – North district");
    }

    #[test]
    fn time_field_falls_back_to_edit_date() {
        let fields = vec!["EditDate".to_string(), "answer".to_string()];
        let table = TableBuilder::new(&fields).unwrap().build();
        let fs = FieldSettings::default();
        assert_eq!(fs.time_field_for(&table), "EditDate");

        let explicit = FieldSettings {
            time_field: Some("Fecha".to_string()),
            ..FieldSettings::default()
        };
        assert_eq!(explicit.time_field_for(&table), "Fecha");
    }

    #[test]
    fn coordinates_default_to_the_point_geometry() {
        let fs = FieldSettings::default();
        let query_fields = vec!["barrio".to_string(), "_lon".to_string(), "_lat".to_string()];
        let table = TableBuilder::new(&query_fields).unwrap().build();
        assert_eq!(fs.lat_field_for(&table), "_lat");
        assert_eq!(fs.lon_field_for(&table), "_lon");

        let export_fields = vec!["x".to_string(), "y".to_string(), "_lat".to_string()];
        let table = TableBuilder::new(&export_fields).unwrap().build();
        assert_eq!(fs.lat_field_for(&table), "y");

        let explicit = FieldSettings {
            lat_field: Some("latitud".to_string()),
            ..FieldSettings::default()
        };
        assert_eq!(explicit.lat_field_for(&table), "latitud");
    }

    #[test]
    fn minimal_config() {
        let config: SurveyConfig = serde_json::from_str(
            r#"{
                "outputSettings": {},
                "dataSources": [{"provider": "csv", "filePath": "responses.csv"}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.fields, FieldSettings::default());
        assert_eq!(config.rules.window_minutes().unwrap(), 10);
        assert_eq!(config.output_settings.title(), OutputSettings::DEFAULT_TITLE);
    }
}
