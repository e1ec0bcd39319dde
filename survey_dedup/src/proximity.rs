//! Pairs of responses that were recorded close to each other, independently of their content.

use log::{debug, info};

use crate::config::*;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point, in decimal degrees.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Great-circle distance in meters, on a spherical earth.
pub fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// A coordinate, if the value is numeric. Text that parses as a number is accepted.
fn coordinate(value: &FieldValue) -> Option<f64> {
    let x = match value {
        FieldValue::Number(x) => *x,
        FieldValue::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if x.is_finite() {
        Some(x)
    } else {
        None
    }
}

/// All the records with both coordinates, in identity order.
pub fn located_points(
    table: &Table,
    lat_field: &str,
    lon_field: &str,
) -> Result<Vec<(RecordId, LatLon)>, DedupErrors> {
    let lat_idx = table.field_index(lat_field)?;
    let lon_idx = table.field_index(lon_field)?;
    let res = table
        .records()
        .iter()
        .filter_map(|r| {
            let lat = coordinate(&r.values[lat_idx])?;
            let lon = coordinate(&r.values[lon_idx])?;
            Some((r.id, LatLon { lat, lon }))
        })
        .collect();
    Ok(res)
}

/// Finds all the unordered pairs of records at most `threshold_m` meters apart.
///
/// The pairs are sorted by increasing distance. Records without numeric
/// coordinates do not take part.
pub fn find_close_pairs(
    table: &Table,
    lat_field: &str,
    lon_field: &str,
    threshold_m: f64,
) -> Result<Vec<ClosePair>, DedupErrors> {
    let mut points = located_points(table, lat_field, lon_field)?;
    info!(
        "find_close_pairs: {} located records out of {}, threshold {} m",
        points.len(),
        table.len(),
        threshold_m
    );
    if threshold_m.is_nan() || threshold_m < 0.0 {
        return Ok(Vec::new());
    }

    // Sweep along the latitude: the great-circle distance is never smaller than the
    // meridian arc between the two latitudes, so once that arc exceeds the threshold,
    // no later point can qualify.
    points.sort_by(|(id1, p1), (id2, p2)| p1.lat.total_cmp(&p2.lat).then(id1.cmp(id2)));
    // The slack keeps rounding from cutting the sweep short of a boundary pair.
    let max_dlat_deg = (threshold_m / EARTH_RADIUS_M).to_degrees() * (1.0 + 1e-9) + 1e-12;

    let mut res: Vec<ClosePair> = Vec::new();
    for (i, (id_i, p_i)) in points.iter().enumerate() {
        for (id_j, p_j) in points[i + 1..].iter() {
            if p_j.lat - p_i.lat > max_dlat_deg {
                break;
            }
            let distance_m = haversine_m(*p_i, *p_j);
            if distance_m <= threshold_m {
                let (id_a, id_b) = if id_i < id_j {
                    (*id_i, *id_j)
                } else {
                    (*id_j, *id_i)
                };
                res.push(ClosePair {
                    id_a,
                    id_b,
                    distance_m,
                });
            }
        }
    }
    res.sort_by(|p1, p2| {
        p1.distance_m
            .total_cmp(&p2.distance_m)
            .then(p1.id_a.cmp(&p2.id_a))
            .then(p1.id_b.cmp(&p2.id_b))
    });
    debug!("find_close_pairs: {} pairs", res.len());
    Ok(res)
}

/// True if all the given records that have coordinates sit on the same point,
/// up to 6 decimals. False when none of them has coordinates.
pub fn shares_location(
    table: &Table,
    ids: &[RecordId],
    lat_field: &str,
    lon_field: &str,
) -> Result<bool, DedupErrors> {
    let lat_idx = table.field_index(lat_field)?;
    let lon_idx = table.field_index(lon_field)?;
    let mut seen: Vec<(i64, i64)> = ids
        .iter()
        .filter_map(|id| {
            let lat = coordinate(table.value(*id, lat_idx)?)?;
            let lon = coordinate(table.value(*id, lon_idx)?)?;
            Some(((lat * 1e6).round() as i64, (lon * 1e6).round() as i64))
        })
        .collect();
    seen.sort();
    seen.dedup();
    Ok(seen.len() == 1)
}

/// The mean point of the located records, if any.
pub fn centroid(table: &Table, lat_field: &str, lon_field: &str) -> Result<Option<LatLon>, DedupErrors> {
    let points = located_points(table, lat_field, lon_field)?;
    if points.is_empty() {
        return Ok(None);
    }
    let n = points.len() as f64;
    let lat = points.iter().map(|(_, p)| p.lat).sum::<f64>() / n;
    let lon = points.iter().map(|(_, p)| p.lon).sum::<f64>() / n;
    Ok(Some(LatLon { lat, lon }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TableBuilder;

    fn table(rows: &[(&str, &str)]) -> Table {
        let fields = vec!["y".to_string(), "x".to_string()];
        let mut b = TableBuilder::new(&fields).unwrap();
        for (lat, lon) in rows {
            b.add_row_simple(&[*lat, *lon]).unwrap();
        }
        b.build()
    }

    fn brute_force(t: &Table, threshold_m: f64) -> Vec<(RecordId, RecordId)> {
        let points = located_points(t, "y", "x").unwrap();
        let mut res = Vec::new();
        for (i, (a, pa)) in points.iter().enumerate() {
            for (b, pb) in points[i + 1..].iter() {
                if haversine_m(*pa, *pb) <= threshold_m {
                    res.push((*a, *b));
                }
            }
        }
        res.sort();
        res
    }

    #[test]
    fn one_thousandth_of_a_degree() {
        let d = haversine_m(
            LatLon {
                lat: 10.0,
                lon: -84.0,
            },
            LatLon {
                lat: 10.001,
                lon: -84.0,
            },
        );
        // R * 0.001 degree in radians
        let expected = EARTH_RADIUS_M * 0.001_f64.to_radians();
        assert!(((d - expected) / expected).abs() < 1e-6, "{}", d);
        assert!((d - 111.19).abs() < 0.01, "{}", d);
    }

    #[test]
    fn threshold_selects_pairs() {
        let t = table(&[("10.0000", "-84.0000"), ("10.0010", "-84.0000")]);
        let pairs = find_close_pairs(&t, "y", "x", 200.0).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].id_a, RecordId(0));
        assert_eq!(pairs[0].id_b, RecordId(1));
        assert!((pairs[0].distance_m - 111.19).abs() < 0.01);
        assert!(find_close_pairs(&t, "y", "x", 50.0).unwrap().is_empty());
    }

    #[test]
    fn records_without_coordinates_are_skipped() {
        let t = table(&[
            ("10.0000", "-84.0000"),
            ("", "-84.0000"),
            ("abc", "-84.0000"),
            ("10.0000", "-84.0000"),
        ]);
        let pairs = find_close_pairs(&t, "y", "x", 10.0).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].id_a, pairs[0].id_b), (RecordId(0), RecordId(3)));
        assert_eq!(pairs[0].distance_m, 0.0);
    }

    #[test]
    fn sweep_matches_brute_force() {
        let mut rows: Vec<(String, String)> = Vec::new();
        // A deterministic scatter around a point, with some exact repeats.
        for i in 0..60u32 {
            let lat = 9.93 + ((i * 37) % 23) as f64 * 0.0003;
            let lon = -84.08 + ((i * 53) % 29) as f64 * 0.0003;
            rows.push((format!("{:.6}", lat), format!("{:.6}", lon)));
        }
        let refs: Vec<(&str, &str)> = rows.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let t = table(&refs);
        for threshold in [0.0, 20.0, 50.0, 120.0, 500.0] {
            let pairs = find_close_pairs(&t, "y", "x", threshold).unwrap();
            let mut ids: Vec<(RecordId, RecordId)> =
                pairs.iter().map(|p| (p.id_a, p.id_b)).collect();
            ids.sort();
            assert_eq!(ids, brute_force(&t, threshold), "threshold {}", threshold);
            assert!(pairs.iter().all(|p| p.id_a < p.id_b));
            assert!(pairs.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
        }
    }

    #[test]
    fn location_sharing_and_center() {
        let t = table(&[
            ("10.0000001", "-84.0"),
            ("10.0", "-84.0000002"),
            ("", ""),
            ("10.5", "-84.0"),
        ]);
        assert!(shares_location(&t, &[RecordId(0), RecordId(1), RecordId(2)], "y", "x").unwrap());
        assert!(!shares_location(&t, &[RecordId(0), RecordId(3)], "y", "x").unwrap());
        assert!(!shares_location(&t, &[RecordId(2)], "y", "x").unwrap());
        let c = centroid(&t, "y", "x").unwrap().unwrap();
        assert!((c.lat - 10.1666667).abs() < 1e-6);
        assert_eq!(
            find_close_pairs(&t, "lat", "x", 10.0),
            Err(DedupErrors::MissingField("lat".to_string()))
        );
    }
}
