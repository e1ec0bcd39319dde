// Reading the result of an ArcGIS feature layer query (f=json).

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Map as JSMap;

use crate::survey::{
    io_common::{text_cell, unique_header, LoadedSheet, GEOMETRY_LAT_FIELD, GEOMETRY_LON_FIELD},
    *,
};

const DATE_FIELD_TYPE: &str = "esriFieldTypeDate";
// WGS 84: the query is made with outSR=4326.
const WGS84_WKID: i64 = 4326;

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct EsriField {
    name: String,
    #[serde(rename = "type")]
    field_type: Option<String>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct EsriFeature {
    #[serde(default)]
    attributes: JSMap<String, JSValue>,
    geometry: Option<JSValue>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct EsriQueryResult {
    #[serde(default)]
    fields: Vec<EsriField>,
    features: Option<Vec<EsriFeature>>,
    #[serde(rename = "spatialReference")]
    spatial_reference: Option<JSValue>,
}

pub fn read_feature_query(path: &str) -> SurveyResult<LoadedSheet> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let query: EsriQueryResult =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    let features = query.features.context(ArcgisNoFeaturesSnafu { path })?;
    parse_features(&query.fields, &features, query.spatial_reference.as_ref())
}

// The points can be used as coordinates only in degrees. Without a declared
// reference, the query is assumed to follow outSR.
fn is_wgs84(spatial_reference: Option<&JSValue>) -> bool {
    let sr = match spatial_reference {
        None | Some(JSValue::Null) => return true,
        Some(sr) => sr,
    };
    let wkid = sr
        .get("latestWkid")
        .and_then(|v| v.as_i64())
        .or_else(|| sr.get("wkid").and_then(|v| v.as_i64()));
    match wkid {
        Some(w) => w == WGS84_WKID,
        None => sr.get("wkt").is_none(),
    }
}

fn parse_features(
    fields: &[EsriField],
    features: &[EsriFeature],
    spatial_reference: Option<&JSValue>,
) -> SurveyResult<LoadedSheet> {
    // The declared fields give the column order. Without them, the attribute
    // names are taken in order of appearance.
    let mut names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
    if names.is_empty() {
        for feature in features.iter() {
            for k in feature.attributes.keys() {
                if !names.contains(k) {
                    names.push(k.clone());
                }
            }
        }
    }
    let date_fields: Vec<&str> = fields
        .iter()
        .filter(|f| f.field_type.as_deref() == Some(DATE_FIELD_TYPE))
        .map(|f| f.name.as_str())
        .collect();

    let points: Vec<Option<(f64, f64)>> = features
        .iter()
        .map(|f| f.geometry.as_ref().and_then(point))
        .collect();
    let mut has_geometry = points.iter().any(|p| p.is_some());
    if has_geometry && !is_wgs84(spatial_reference) {
        warn!(
            "read_feature_query: the geometry is not in WGS 84 ({:?}), the points are ignored",
            spatial_reference
        );
        has_geometry = false;
    }

    let mut raw_header = names.clone();
    if has_geometry {
        raw_header.push(GEOMETRY_LON_FIELD.to_string());
        raw_header.push(GEOMETRY_LAT_FIELD.to_string());
    }
    let header = unique_header(&raw_header);
    debug!("read_feature_query: header: {:?}", header);

    let mut rows: Vec<Vec<FieldValue>> = Vec::new();
    for (feature, pt) in features.iter().zip(points.iter()) {
        let mut row: Vec<FieldValue> = names
            .iter()
            .map(|name| {
                let is_date = date_fields.contains(&name.as_str());
                match feature.attributes.get(name) {
                    Some(v) => attribute_value(v, is_date),
                    None => FieldValue::Empty,
                }
            })
            .collect();
        if has_geometry {
            match pt {
                Some((x, y)) => {
                    row.push(FieldValue::Number(*x));
                    row.push(FieldValue::Number(*y));
                }
                None => {
                    row.push(FieldValue::Empty);
                    row.push(FieldValue::Empty);
                }
            }
        }
        rows.push(row);
    }
    info!("read_feature_query: {} features", rows.len());
    Ok(LoadedSheet { header, rows })
}

fn point(geometry: &JSValue) -> Option<(f64, f64)> {
    let x = geometry.get("x")?.as_f64()?;
    let y = geometry.get("y")?.as_f64()?;
    Some((x, y))
}

fn attribute_value(v: &JSValue, is_date: bool) -> FieldValue {
    match v {
        JSValue::Null => FieldValue::Empty,
        JSValue::Bool(b) => FieldValue::Bool(*b),
        JSValue::Number(n) if is_date => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|t| FieldValue::Time(t.naive_utc()))
            .unwrap_or_else(|| FieldValue::Text(n.to_string())),
        JSValue::Number(n) => match n.as_f64() {
            Some(x) => FieldValue::Number(x),
            None => FieldValue::Text(n.to_string()),
        },
        JSValue::String(s) => text_cell(s),
        other => FieldValue::Text(other.to_string()),
    }
}
