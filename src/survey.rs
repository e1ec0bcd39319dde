use log::{debug, info, warn};

use snafu::{prelude::*, Snafu};
use survey_dedup::*;

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;
use crate::survey::config_reader::*;
use crate::survey::io_common::*;

pub mod config_reader;
mod io_arcgis;
mod io_common;
mod io_csv;
mod io_excel;
mod report;

#[derive(Debug, Snafu)]
pub enum SurveyError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The workbook {path} has no worksheet or no header row"))]
    EmptyExcel { path: String },
    #[snafu(display("The workbook {path} has no worksheet named {name}"))]
    MissingWorksheet { path: String, name: String },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading line {lineno} of CSV file {path}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("Error writing CSV file {path}"))]
    CsvWrite { source: csv::Error, path: String },
    #[snafu(display("Error writing Excel file {path}"))]
    XlsxWrite {
        source: rust_xlsxwriter::XlsxError,
        path: String,
    },
    #[snafu(display("Error reading file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Error parsing number in configuration: {value}"))]
    ParsingJsonNumber { value: String },
    #[snafu(display("The ArcGIS query result {path} has no features"))]
    ArcgisNoFeatures { path: String },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("The data source {path} does not have the same columns as the first source"))]
    HeaderMismatch { path: String },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Invalid table in {path}: {source}"))]
    InvalidTable { source: DedupErrors, path: String },
    #[snafu(display("Analysis failed: {source}"))]
    Analysis { source: DedupErrors },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type SurveyResult<T> = Result<T, SurveyError>;

/// Everything needed for one analysis pass, after merging the configuration
/// file and the command line.
#[derive(PartialEq, Debug, Clone)]
pub struct AnalysisSettings {
    pub title: String,
    pub sources: Vec<(PathBuf, DataSource)>,
    pub fields: FieldSettings,
    pub window_minutes: i64,
    pub keep_policy: KeepPolicy,
    pub proximity_threshold_m: Option<f64>,
    pub cleaned_path: Option<PathBuf>,
}

fn settings_from_config(config_path: &str) -> SurveyResult<AnalysisSettings> {
    let config = read_config(config_path)?;
    info!("config: {:?}", config);
    let root_p = Path::new(config_path)
        .parent()
        .context(MissingParentDirSnafu {})?;

    let sources = config
        .data_sources
        .iter()
        .map(|ds| (root_p.join(&ds.file_path), ds.clone()))
        .collect();
    let cleaned_path = config.output_settings.cleaned_file_name.as_ref().map(|name| {
        match &config.output_settings.output_directory {
            Some(dir) => root_p.join(dir).join(name),
            None => root_p.join(name),
        }
    });
    Ok(AnalysisSettings {
        title: config.output_settings.title(),
        sources,
        fields: config.fields.clone(),
        window_minutes: config.rules.window_minutes()?,
        keep_policy: config.rules.keep_policy()?,
        proximity_threshold_m: config.rules.proximity_threshold_meters,
        cleaned_path,
    })
}

fn default_settings() -> AnalysisSettings {
    AnalysisSettings {
        title: OutputSettings::DEFAULT_TITLE.to_string(),
        sources: Vec::new(),
        fields: FieldSettings::default(),
        window_minutes: DedupRules::DEFAULT_WINDOW_MINUTES,
        keep_policy: KeepPolicy::MostRecent,
        proximity_threshold_m: None,
        cleaned_path: None,
    }
}

/// Builds the settings: the configuration file if any, then the command line on top.
fn build_settings(args: &Args) -> SurveyResult<AnalysisSettings> {
    let mut settings = match &args.config {
        Some(config_path) => settings_from_config(config_path)?,
        None => default_settings(),
    };

    if let Some(input) = &args.input {
        let source = DataSource {
            provider: args.input_type.clone().unwrap_or_else(|| "csv".to_string()),
            file_path: input.clone(),
            excel_worksheet_name: args.excel_worksheet_name.clone(),
        };
        settings.sources = vec![(PathBuf::from(input), source)];
    }
    if let Some(time_field) = &args.time_field {
        settings.fields.time_field = Some(time_field.clone());
        settings.fields.fallback_time_field = None;
    }
    if let Some(content_fields) = &args.content_fields {
        settings.fields.content_fields = Some(content_fields.clone());
    }
    if let Some(w) = args.window_minutes {
        settings.window_minutes = w;
    }
    if let Some(keep) = &args.keep {
        settings.keep_policy = parse_keep_policy(keep)?;
    }
    if let Some(d) = args.proximity_meters {
        settings.proximity_threshold_m = Some(d);
    }
    if let Some(cleaned) = &args.cleaned {
        settings.cleaned_path = Some(PathBuf::from(cleaned));
    }

    if settings.sources.is_empty() {
        whatever!("No data source: provide a configuration file with --config or a file with --input")
    }
    Ok(settings)
}

fn read_source(path: &Path, ds: &DataSource) -> SurveyResult<LoadedSheet> {
    let p = path.display().to_string();
    info!("Attempting to read survey file {:?}", p);
    match ds.provider.as_str() {
        "csv" => io_csv::read_csv(&p),
        "xlsx" | "excel" => io_excel::read_excel(&p, ds.excel_worksheet_name.as_deref()),
        "arcgis_json" => io_arcgis::read_feature_query(&p),
        x => whatever!("Provider not implemented {:?}", x),
    }
}

/// Reads all the sources into one table. The rows keep the order of the sources.
pub fn load_table(sources: &[(PathBuf, DataSource)]) -> SurveyResult<Table> {
    let mut sheets: Vec<(String, LoadedSheet)> = Vec::new();
    for (path, ds) in sources.iter() {
        let sheet = read_source(path, ds)?;
        sheets.push((path.display().to_string(), sheet));
    }
    merge_sheets(sheets)
}

/// The rules for this table, with the defaults of the survey exports filled in.
fn resolve_rules(table: &Table, settings: &AnalysisSettings) -> DedupRules {
    let fields = &settings.fields;
    let time_field = fields.time_field_for(table);
    let content_fields = match &fields.content_fields {
        Some(cf) => cf.clone(),
        None => default_content_fields(
            table.fields(),
            &time_field,
            &fields.lat_field_for(table),
            &fields.lon_field_for(table),
            &fields.excluded_fields.clone().unwrap_or_default(),
        ),
    };
    let multivalue_fields = match &fields.multi_value_fields {
        Some(names) if !names.is_empty() => MultiValueFields::Named(names.clone()),
        _ => MultiValueFields::Marker(
            fields
                .multi_value_marker
                .clone()
                .unwrap_or_else(|| DedupRules::DEFAULT_MULTIVALUE_MARKER.to_string()),
        ),
    };
    DedupRules {
        time_field,
        window_minutes: settings.window_minutes,
        content_fields,
        multivalue_fields,
    }
}

/// The outcome of an analysis pass, before it is turned into a report.
#[derive(PartialEq, Debug, Clone)]
pub struct AnalysisOutcome {
    pub rules: DedupRules,
    pub analysis: Analysis,
    pub plan: CleanupPlan,
    pub cleaned: Table,
    pub residual_groups: usize,
    pub close_pairs: Option<Vec<ClosePair>>,
    pub lat_field: String,
    pub lon_field: String,
}

pub fn analyze_table(table: &Table, settings: &AnalysisSettings) -> SurveyResult<AnalysisOutcome> {
    let rules = resolve_rules(table, settings);
    let lat_field = settings.fields.lat_field_for(table);
    let lon_field = settings.fields.lon_field_for(table);
    debug!(
        "analyze_table: rules: {:?} coordinates: {:?} {:?}",
        rules, lat_field, lon_field
    );

    let analysis = analyze(table, &rules).context(AnalysisSnafu {})?;
    for issue in analysis.issues.iter() {
        debug!("analyze_table: issue: {:?}", issue);
    }
    let plan = plan_cleanup(
        &analysis.groups,
        table,
        &rules.time_field,
        settings.keep_policy,
    )
    .context(AnalysisSnafu {})?;
    let cleaned = apply_cleanup(table, &plan);

    // The groups are a derived view: compute them again on the cleaned snapshot.
    let residual = detect_duplicate_groups(&cleaned, &rules).context(AnalysisSnafu {})?;
    if !residual.is_empty() {
        warn!(
            "analyze_table: {} groups remain after the cleanup",
            residual.len()
        );
    }

    let close_pairs = match settings.proximity_threshold_m {
        Some(threshold) => Some(
            find_close_pairs(table, &lat_field, &lon_field, threshold)
                .context(AnalysisSnafu {})?,
        ),
        None => None,
    };

    Ok(AnalysisOutcome {
        rules,
        analysis,
        plan,
        cleaned,
        residual_groups: residual.len(),
        close_pairs,
        lat_field,
        lon_field,
    })
}

pub fn run_analysis(args: &Args) -> SurveyResult<()> {
    let settings = build_settings(args)?;
    let table = load_table(&settings.sources)?;
    info!(
        "run_analysis: {} responses, {} fields",
        table.len(),
        table.fields().len()
    );

    let outcome = analyze_table(&table, &settings)?;
    let report_js = report::build_report(&settings, &table, &outcome)?;
    let pretty_report = serde_json::to_string_pretty(&report_js).context(ParsingJsonSnafu {})?;

    match args.out.as_deref() {
        None | Some("stdout") => println!("{}", pretty_report),
        Some(path) => {
            fs::write(path, &pretty_report).context(WritingFileSnafu { path })?;
            info!("run_analysis: report written to {:?}", path);
        }
    }

    if let Some(cleaned_path) = &settings.cleaned_path {
        let p = cleaned_path.display().to_string();
        report::write_cleaned(&outcome.cleaned, &p)?;
        info!(
            "run_analysis: {} responses written to {:?}",
            outcome.cleaned.len(),
            p
        );
    }

    // The reference report, if provided for comparison
    if let Some(reference_p) = &args.reference {
        check_reference(reference_p, &pretty_report)?;
    }

    Ok(())
}

fn check_reference(reference_p: &str, pretty_report: &str) -> SurveyResult<()> {
    let reference: JSValue = read_reference(reference_p)?;
    let pretty_reference = serde_json::to_string_pretty(&reference).context(ParsingJsonSnafu {})?;
    if pretty_reference != pretty_report {
        warn!("Found differences with the reference report");
        print_diff(pretty_reference.as_str(), pretty_report, "\n");
        whatever!("Difference detected between the produced report and the reference report")
    }
    Ok(())
}
