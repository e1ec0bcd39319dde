mod config;
mod table;
pub mod builder;
pub mod instant;
pub mod normalize;
pub mod proximity;

use log::{debug, info, warn};

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};

pub use crate::config::*;
pub use crate::instant::parse_instant;
pub use crate::normalize::{normalize_multivalue, normalize_scalar};
pub use crate::proximity::find_close_pairs;

// **** Private structures ****

// One normalized value per content field, in rule order.
// Kept as a tuple and never concatenated: ("x", "yz") and ("xy", "z") are different keys.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
struct CanonicalKey(Vec<String>);

impl CanonicalKey {
    /// A key made only of empty values is not evidence of duplication.
    fn is_blank(&self) -> bool {
        self.0.iter().all(|s| s.is_empty())
    }

    fn digest(&self) -> String {
        // Length-prefixed, so that the boundaries between fields cannot shift.
        let encoded: String = self
            .0
            .iter()
            .map(|s| format!("{}:{};", s.len(), s))
            .collect();
        sha256::digest(encoded)
    }
}

#[derive(Debug, Clone)]
struct ContentColumn {
    name: String,
    idx: usize,
    multivalue: bool,
}

// The rules, checked against the schema of one table.
#[derive(Debug, Clone)]
struct ResolvedRules {
    time_idx: usize,
    window: Duration,
    content: Vec<ContentColumn>,
}

fn resolve_rules(table: &Table, rules: &DedupRules) -> Result<ResolvedRules, DedupErrors> {
    let time_idx = table.field_index(&rules.time_field)?;
    if rules.window_minutes < 0 {
        return Err(DedupErrors::InvalidWindow(rules.window_minutes));
    }
    let window = Duration::try_minutes(rules.window_minutes)
        .ok_or(DedupErrors::InvalidWindow(rules.window_minutes))?;
    let mut content: Vec<ContentColumn> = Vec::new();
    for name in rules.content_fields.iter() {
        content.push(ContentColumn {
            name: name.clone(),
            idx: table.field_index(name)?,
            multivalue: rules.multivalue_fields.is_multivalue(name),
        });
    }
    Ok(ResolvedRules {
        time_idx,
        window,
        content,
    })
}

fn canonical_key(record: &Record, content: &[ContentColumn]) -> CanonicalKey {
    CanonicalKey(
        content
            .iter()
            .map(|c| {
                let v = &record.values[c.idx];
                if c.multivalue {
                    normalize_multivalue(v)
                } else {
                    normalize_scalar(v)
                }
            })
            .collect(),
    )
}

/// Finds the groups of duplicated responses.
///
/// Arguments:
/// * `table` the responses
/// * `rules` the time field, the window, and the content fields that define "the same answer"
///
/// The groups are sorted by decreasing size, then by decreasing latest time.
/// Records with an undefined time are left out of all the groups.
pub fn detect_duplicate_groups(
    table: &Table,
    rules: &DedupRules,
) -> Result<Vec<DuplicateGroup>, DedupErrors> {
    let (groups, _) = detect_with_issues(table, rules)?;
    Ok(groups)
}

/// Same as [detect_duplicate_groups], also reporting the time values that could not be understood.
pub fn detect_with_issues(
    table: &Table,
    rules: &DedupRules,
) -> Result<(Vec<DuplicateGroup>, Vec<ValueCoercionIssue>), DedupErrors> {
    let resolved = resolve_rules(table, rules)?;
    info!(
        "detect_duplicate_groups: {} records, {} content fields, window: {} min",
        table.len(),
        resolved.content.len(),
        rules.window_minutes
    );

    let mut issues: Vec<ValueCoercionIssue> = Vec::new();
    let mut partitions: HashMap<CanonicalKey, Vec<(NaiveDateTime, RecordId)>> = HashMap::new();
    let mut num_blank: usize = 0;
    let mut num_untimed: usize = 0;
    for record in table.records() {
        let time_value = &record.values[resolved.time_idx];
        let instant = parse_instant(time_value);
        if instant.is_none() {
            if let Some(raw) = time_value.as_text() {
                warn!(
                    "detect_duplicate_groups: record {}: cannot read {:?} as a time for field {:?}",
                    record.id, raw, rules.time_field
                );
                issues.push(ValueCoercionIssue {
                    record: record.id,
                    field: rules.time_field.clone(),
                    raw,
                });
            }
        }

        let key = canonical_key(record, &resolved.content);
        if key.is_blank() {
            num_blank += 1;
            continue;
        }
        match instant {
            Some(t) => partitions.entry(key).or_default().push((t, record.id)),
            None => num_untimed += 1,
        }
    }
    debug!(
        "detect_duplicate_groups: {} partitions, {} blank records, {} records without time",
        partitions.len(),
        num_blank,
        num_untimed
    );

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for (key, mut members) in partitions.into_iter() {
        if members.len() < 2 {
            continue;
        }
        members.sort();
        for run in split_runs(&members, resolved.window) {
            if run.len() < 2 {
                continue;
            }
            groups.push(make_group(&key, run, &resolved.content));
        }
    }

    groups.sort_by(|g1, g2| {
        g2.size
            .cmp(&g1.size)
            .then(g2.last_time.cmp(&g1.last_time))
            .then(g1.identities.first().cmp(&g2.identities.first()))
    });
    info!(
        "detect_duplicate_groups: {} groups, {} records involved, {} time issues",
        groups.len(),
        groups.iter().map(|g| g.size).sum::<usize>(),
        issues.len()
    );
    Ok((groups, issues))
}

// Splits time-sorted members into the maximal runs where each gap is at most the window.
fn split_runs(
    members: &[(NaiveDateTime, RecordId)],
    window: Duration,
) -> Vec<&[(NaiveDateTime, RecordId)]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for idx in 1..members.len() {
        let gap = members[idx].0 - members[idx - 1].0;
        if gap > window {
            runs.push(&members[start..idx]);
            start = idx;
        }
    }
    if !members.is_empty() {
        runs.push(&members[start..]);
    }
    runs
}

fn make_group(
    key: &CanonicalKey,
    run: &[(NaiveDateTime, RecordId)],
    content: &[ContentColumn],
) -> DuplicateGroup {
    let group = DuplicateGroup {
        identities: run.iter().map(|(_, id)| *id).collect(),
        size: run.len(),
        first_time: run.first().map(|(t, _)| *t),
        last_time: run.last().map(|(t, _)| *t),
        canonical_content: content
            .iter()
            .zip(key.0.iter())
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect(),
        content_digest: key.digest(),
    };
    debug!(
        "make_group: {:?} size {} from {:?} to {:?}",
        group.identities, group.size, group.first_time, group.last_time
    );
    group
}

/// Chooses the record to keep in a group.
///
/// The most recent (or oldest) time wins, the lowest identity breaks the ties.
/// If no time can be read, the first record in input order is kept.
/// Members that are not in the table anymore are ignored.
pub fn select_keep(
    group: &DuplicateGroup,
    table: &Table,
    time_field: &str,
    policy: KeepPolicy,
) -> Result<RecordId, DedupErrors> {
    let time_idx = table.field_index(time_field)?;
    let mut live: Vec<RecordId> = group
        .identities
        .iter()
        .filter(|id| table.get(**id).is_some())
        .cloned()
        .collect();
    live.sort();
    let first = match live.first() {
        Some(id) => *id,
        None => {
            return Err(match group.identities.first() {
                Some(id) => DedupErrors::UnknownRecord(*id),
                None => DedupErrors::EmptyGroup,
            })
        }
    };

    let mut best: Option<(NaiveDateTime, RecordId)> = None;
    // Identities are visited in increasing order: only a strictly better time replaces the best.
    for id in live.iter() {
        let t = match table.value(*id, time_idx).and_then(parse_instant) {
            Some(t) => t,
            None => continue,
        };
        let better = match (best, policy) {
            (None, _) => true,
            (Some((bt, _)), KeepPolicy::MostRecent) => t > bt,
            (Some((bt, _)), KeepPolicy::Oldest) => t < bt,
        };
        if better {
            best = Some((t, *id));
        }
    }
    Ok(best.map(|(_, id)| id).unwrap_or(first))
}

/// Decides, for every group, which record stays and which ones go.
///
/// Groups with at most one member left in the table need no decision.
pub fn plan_cleanup(
    groups: &[DuplicateGroup],
    table: &Table,
    time_field: &str,
    policy: KeepPolicy,
) -> Result<CleanupPlan, DedupErrors> {
    let mut plan = CleanupPlan::default();
    for group in groups.iter() {
        let live: Vec<RecordId> = group
            .identities
            .iter()
            .filter(|id| table.get(**id).is_some())
            .cloned()
            .collect();
        if live.len() <= 1 {
            continue;
        }
        let keep = select_keep(group, table, time_field, policy)?;
        let remove: Vec<RecordId> = live.into_iter().filter(|id| *id != keep).collect();
        plan.decisions.push(KeepDecision { keep, remove });
    }
    info!(
        "plan_cleanup: {} groups, {} records to remove, policy {:?}",
        plan.decisions.len(),
        plan.decisions.iter().map(|d| d.remove.len()).sum::<usize>(),
        policy
    );
    Ok(plan)
}

/// Applies a cleanup plan, returning the new snapshot.
pub fn apply_cleanup(table: &Table, plan: &CleanupPlan) -> Table {
    table.without(&plan.removed())
}

/// The headline counts of an analysis.
pub fn summarize(
    table: &Table,
    groups: &[DuplicateGroup],
    issues: &[ValueCoercionIssue],
    time_field: &str,
) -> Result<Summary, DedupErrors> {
    let time_idx = table.field_index(time_field)?;
    let in_groups: usize = groups.iter().map(|g| g.size).sum();
    let to_remove: usize = groups.iter().map(|g| g.size.saturating_sub(1)).sum();
    let last_response = table
        .records()
        .iter()
        .filter_map(|r| parse_instant(&r.values[time_idx]))
        .max();
    Ok(Summary {
        total: table.len(),
        in_groups,
        to_remove,
        validated: table.len().saturating_sub(to_remove),
        last_response,
        coercion_issues: issues.len(),
    })
}

/// Runs the detection and computes the summary in one pass.
pub fn analyze(table: &Table, rules: &DedupRules) -> Result<Analysis, DedupErrors> {
    let (groups, issues) = detect_with_issues(table, rules)?;
    let summary = summarize(table, &groups, &issues, &rules.time_field)?;
    Ok(Analysis {
        groups,
        issues,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::builder::TableBuilder;
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // Columns: time, answer, factors
    fn table(rows: &[(&str, &str, &str)]) -> Table {
        let mut b = TableBuilder::new(&fields(&["CreationDate", "answer", "Factores"])).unwrap();
        for (t, a, f) in rows {
            b.add_row_simple(&[*t, *a, *f]).unwrap();
        }
        b.build()
    }

    fn rules() -> DedupRules {
        DedupRules::new("CreationDate", &fields(&["answer", "Factores"]))
    }

    fn ids(v: &[usize]) -> Vec<RecordId> {
        v.iter().map(|x| RecordId(*x)).collect()
    }

    #[test]
    fn window_boundary() {
        let t = table(&[
            ("2024-03-01 10:00", "yes", ""),
            ("2024-03-01 10:09", "yes", ""),
            ("2024-03-01 10:21", "yes", ""),
        ]);
        let groups = detect_duplicate_groups(&t, &rules()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].identities, ids(&[0, 1]));
        assert_eq!(groups[0].size, 2);
    }

    #[test]
    fn gap_equal_to_window_stays_in_group() {
        let t = table(&[
            ("2024-03-01 10:00", "yes", ""),
            ("2024-03-01 10:10", "yes", ""),
            ("2024-03-01 10:20", "yes", ""),
        ]);
        let groups = detect_duplicate_groups(&t, &rules()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].identities, ids(&[0, 1, 2]));
    }

    #[test]
    fn multivalue_fields_ignore_order() {
        let t = table(&[
            ("2024-03-01 10:00", "Yes", "Robo; Drogas"),
            ("2024-03-01 10:02", " yes ", "drogas,ROBO"),
        ]);
        let groups = detect_duplicate_groups(&t, &rules()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].canonical_content,
            vec![
                ("answer".to_string(), "yes".to_string()),
                ("Factores".to_string(), "drogas,robo".to_string())
            ]
        );
        assert_eq!(groups[0].content_digest.len(), 64);
    }

    #[test]
    fn multivalue_policy_is_configurable() {
        let t = table(&[
            ("2024-03-01 10:00", "b,a", ""),
            ("2024-03-01 10:02", "a,b", ""),
        ]);
        assert!(detect_duplicate_groups(&t, &rules()).unwrap().is_empty());
        let mut r = rules();
        r.multivalue_fields = MultiValueFields::Named(fields(&["answer"]));
        assert_eq!(detect_duplicate_groups(&t, &r).unwrap().len(), 1);
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let t = table(&[
            ("2024-03-01 10:00", "x", "yz"),
            ("2024-03-01 10:01", "xy", "z"),
        ]);
        assert!(detect_duplicate_groups(&t, &rules()).unwrap().is_empty());
        let r0 = &t.records()[0];
        let r1 = &t.records()[1];
        let content = resolve_rules(&t, &rules()).unwrap().content;
        let k0 = canonical_key(r0, &content);
        let k1 = canonical_key(r1, &content);
        assert_ne!(k0, k1);
        assert_ne!(k0.digest(), k1.digest());
    }

    #[test]
    fn blank_content_is_never_grouped() {
        let t = table(&[
            ("2024-03-01 10:00", "", ""),
            ("2024-03-01 10:00", "  ", " ; "),
            ("2024-03-01 10:01", "", ""),
        ]);
        assert!(detect_duplicate_groups(&t, &rules()).unwrap().is_empty());
    }

    #[test]
    fn undefined_times_are_left_out() {
        let t = table(&[
            ("2024-03-01 10:00", "yes", ""),
            ("not a date", "yes", ""),
            ("", "yes", ""),
            ("2024-03-01 10:05", "yes", ""),
        ]);
        let (groups, issues) = detect_with_issues(&t, &rules()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].identities, ids(&[0, 3]));
        // The blank time is not an issue, only the unreadable one.
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record, RecordId(1));
        assert_eq!(issues[0].raw, "not a date");
    }

    #[test]
    fn missing_fields_are_configuration_errors() {
        let t = table(&[("2024-03-01 10:00", "yes", "")]);
        let mut r = rules();
        r.time_field = "EditDate".to_string();
        assert_eq!(
            detect_duplicate_groups(&t, &r),
            Err(DedupErrors::MissingField("EditDate".to_string()))
        );
        let r = DedupRules::new("CreationDate", &fields(&["answer", "comments"]));
        assert_eq!(
            detect_duplicate_groups(&t, &r),
            Err(DedupErrors::MissingField("comments".to_string()))
        );
        let mut r = rules();
        r.window_minutes = -1;
        assert_eq!(
            detect_duplicate_groups(&t, &r),
            Err(DedupErrors::InvalidWindow(-1))
        );
    }

    #[test]
    fn groups_are_ordered_by_size_then_recency() {
        let t = table(&[
            ("2024-03-01 08:00", "a", ""),
            ("2024-03-01 08:01", "a", ""),
            ("2024-03-01 09:00", "b", ""),
            ("2024-03-01 09:01", "b", ""),
            ("2024-03-01 07:00", "c", ""),
            ("2024-03-01 07:01", "c", ""),
            ("2024-03-01 07:02", "c", ""),
        ]);
        let groups = detect_duplicate_groups(&t, &rules()).unwrap();
        let firsts: Vec<RecordId> = groups.iter().map(|g| g.identities[0]).collect();
        assert_eq!(firsts, ids(&[4, 2, 0]));
        // Same input, same output.
        assert_eq!(groups, detect_duplicate_groups(&t, &rules()).unwrap());
    }

    #[test]
    fn keep_policies() {
        let t = table(&[
            ("2024-03-01 10:05", "yes", ""),
            ("2024-03-01 10:00", "yes", ""),
            ("2024-03-01 10:08", "yes", ""),
            ("2024-03-01 10:08", "yes", ""),
        ]);
        let groups = detect_duplicate_groups(&t, &rules()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].identities, ids(&[1, 0, 2, 3]));
        let g = &groups[0];
        assert_eq!(
            select_keep(g, &t, "CreationDate", KeepPolicy::MostRecent),
            Ok(RecordId(2))
        );
        assert_eq!(
            select_keep(g, &t, "CreationDate", KeepPolicy::Oldest),
            Ok(RecordId(1))
        );
    }

    #[test]
    fn keep_without_readable_times() {
        let t = table(&[("??", "yes", ""), ("later", "yes", ""), ("", "yes", "")]);
        let g = DuplicateGroup {
            identities: ids(&[2, 1]),
            size: 2,
            first_time: None,
            last_time: None,
            canonical_content: Vec::new(),
            content_digest: "".to_string(),
        };
        assert_eq!(
            select_keep(&g, &t, "CreationDate", KeepPolicy::MostRecent),
            Ok(RecordId(1))
        );
        let gone = t.without(&ids(&[1, 2]));
        assert_eq!(
            select_keep(&g, &gone, "CreationDate", KeepPolicy::Oldest),
            Err(DedupErrors::UnknownRecord(RecordId(2)))
        );
    }

    #[test]
    fn cleanup_is_idempotent() {
        let t = table(&[
            ("2024-03-01 10:00", "a", ""),
            ("2024-03-01 10:05", "a", ""),
            ("2024-03-01 10:30", "a", ""),
            ("2024-03-01 09:00", "b", ""),
            ("2024-03-01 09:03", "b", ""),
            ("2024-03-01 09:04", "b", ""),
            ("2024-03-01 09:15", "b", ""),
        ]);
        for policy in [KeepPolicy::MostRecent, KeepPolicy::Oldest] {
            let groups = detect_duplicate_groups(&t, &rules()).unwrap();
            let plan = plan_cleanup(&groups, &t, "CreationDate", policy).unwrap();
            let removed = plan.removed();
            let cleaned = apply_cleanup(&t, &plan);
            assert_eq!(cleaned.len(), t.len() - removed.len());
            let again = detect_duplicate_groups(&cleaned, &rules()).unwrap();
            assert!(again.is_empty(), "{:?}: {:?}", policy, again);
            // Nothing left to do.
            let plan2 = plan_cleanup(&groups, &cleaned, "CreationDate", policy).unwrap();
            assert!(plan2.decisions.is_empty());
        }
    }

    #[test]
    fn summary_counts() {
        let t = table(&[
            ("2024-03-01 10:00", "a", ""),
            ("2024-03-01 10:05", "a", ""),
            ("2024-03-01 10:06", "a", ""),
            ("2024-03-01 11:00", "b", ""),
            ("garbage", "c", ""),
        ]);
        let a = analyze(&t, &rules()).unwrap();
        assert_eq!(a.summary.total, 5);
        assert_eq!(a.summary.in_groups, 3);
        assert_eq!(a.summary.to_remove, 2);
        assert_eq!(a.summary.validated, 3);
        assert_eq!(a.summary.coercion_issues, 1);
        assert_eq!(
            a.summary.last_response,
            parse_instant(&FieldValue::Text("2024-03-01 11:00".to_string()))
        );
    }
}
