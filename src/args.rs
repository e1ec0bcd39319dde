use clap::Parser;

/// This program finds duplicated survey responses and cleans them up.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The JSON file describing the data sources, the fields and the rules.
    /// The paths of the data sources are relative to this file.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,
    /// (file path) A reference report in JSON format. If provided, surveydedup will
    /// check that the produced report matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the report will be written in JSON format to the given
    /// location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path or empty) If specified, the survey export to read. Setting this option overrides the
    /// data sources of the --config option.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default csv) The type of the input: csv, xlsx or arcgis_json.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// When using an Excel file, indicates the name of the worksheet to use.
    #[clap(long, value_parser)]
    pub excel_worksheet_name: Option<String>,

    /// (default CreationDate, then EditDate) The field holding the time of each response.
    #[clap(long, value_parser)]
    pub time_field: Option<String>,

    /// (list of fields or not specified) The fields that define the content of a response.
    /// By default, all the fields except the metadata and the coordinates.
    #[clap(long, value_parser)]
    pub content_fields: Option<Vec<String>>,

    /// (default 10) The maximum number of minutes between two consecutive duplicated responses.
    #[clap(long, value_parser)]
    pub window_minutes: Option<i64>,

    /// (default most_recent) Which response to keep in a group: most_recent or oldest.
    #[clap(long, value_parser)]
    pub keep: Option<String>,

    /// (distance in meters, optional) If specified, pairs of responses recorded closer than this
    /// distance are reported.
    #[clap(long, value_parser)]
    pub proximity_meters: Option<f64>,

    /// (file path, optional) If specified, the responses left after the cleanup are written to this file (xlsx for a .xlsx name, CSV otherwise).
    #[clap(long, value_parser)]
    pub cleaned: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
