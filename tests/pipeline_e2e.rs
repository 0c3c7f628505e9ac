//! End-to-end runs of the four stages over files in a temporary directory.

mod common;

use std::fs;

use common::{bib_record, encode_records, FakeHoldings};
use marc_holdings::config::Settings;
use marc_holdings::pipeline::{
    convert_file, extract_file, fetch_file, resolve_file, run_pipeline, StageOptions, WorkFiles,
};
use marc_holdings::report::write_failure_report;
use marc_holdings::error::ApiResult;
use marc_holdings::{
    CancellationToken, FailurePolicy, Field, HoldingsApi, HoldingsError, Identifier, Leader,
    MarcReader, NormalizeTargets, Record, Tag, TextEncoding,
};

fn api() -> FakeHoldings {
    FakeHoldings::default()
        .with_listing("991", &["2201"])
        .with_listing("992", &["2203", "2202"])
}

fn read_binary(path: &std::path::Path) -> Vec<Record> {
    let bytes = fs::read(path).unwrap();
    MarcReader::new(bytes.as_slice())
        .collect::<Result<_, _>>()
        .unwrap()
}

fn ids_of(records: &[Record]) -> Vec<(String, String)> {
    records
        .iter()
        .map(|r| {
            (
                r.control_value(Tag::CONTROL_NUMBER).unwrap().to_string(),
                r.control_value(Tag::LINKAGE_NUMBER).unwrap().to_string(),
            )
        })
        .collect()
}

#[test]
fn full_run_rebuilds_holdings() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bibs.mrc");
    let output = dir.path().join("holdings.mrc");
    let work = dir.path().join("work");
    fs::write(
        &input,
        encode_records(&[bib_record("991", "First"), bib_record("992", "Second")]),
    )
    .unwrap();

    let api = api();
    let reports = run_pipeline(
        &api,
        &input,
        &work,
        &output,
        &Settings::default(),
        &StageOptions::default(),
    )
    .unwrap();

    let counts: Vec<(&str, usize, usize)> = reports
        .iter()
        .map(|r| (r.stage, r.processed, r.emitted))
        .collect();
    assert_eq!(
        counts,
        [("extract", 2, 2), ("resolve", 2, 3), ("fetch", 3, 3), ("convert", 3, 3)]
    );
    assert!(reports.iter().all(|r| r.is_clean()));

    let files = WorkFiles::in_dir(&work);
    assert_eq!(fs::read_to_string(&files.ids).unwrap(), "991\n992\n");
    assert_eq!(
        fs::read_to_string(&files.pairs).unwrap(),
        "2201\t991\n2203\t992\n2202\t992\n"
    );

    let records = read_binary(&output);
    assert_eq!(
        ids_of(&records),
        [
            ("2201".to_string(), "991".to_string()),
            ("2203".to_string(), "992".to_string()),
            ("2202".to_string(), "992".to_string()),
        ]
    );
    for record in &records {
        let tags: Vec<String> = record.fields().iter().map(|f| f.tag().to_string()).collect();
        assert_eq!(tags, ["001", "004", "005", "008", "852"]);
        assert!(record.validate_structure().is_ok());
    }
    assert_eq!(api.calls(), 2 + 3);
}

#[test]
fn stages_can_be_run_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = |name: &str| dir.path().join(name);
    fs::write(path("bibs.mrc"), encode_records(&[bib_record("992", "Only")])).unwrap();

    let api = api();
    let options = StageOptions::default();
    extract_file(&path("bibs.mrc"), &path("ids.txt"), TextEncoding::utf8(), &options).unwrap();
    resolve_file(&api, &path("ids.txt"), &path("pairs.txt"), &options).unwrap();

    // A hand-edited pair list is accepted as long as it is well formed.
    fs::write(path("pairs.txt"), "2202\t992\r\n").unwrap();
    fetch_file(
        &api,
        &path("pairs.txt"),
        &path("holdings.xml"),
        &NormalizeTargets::default(),
        &options,
    )
    .unwrap();
    let xml = fs::read_to_string(path("holdings.xml")).unwrap();
    assert!(xml.contains(r#"<controlfield tag="001">2202</controlfield>"#));
    assert!(xml.contains(r#"<controlfield tag="004">992</controlfield>"#));

    convert_file(&path("holdings.xml"), &path("out.mrc"), TextEncoding::utf8(), &options).unwrap();
    assert_eq!(
        ids_of(&read_binary(&path("out.mrc"))),
        [("2202".to_string(), "992".to_string())]
    );
}

#[test]
fn unknown_bib_is_skipped_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bibs.mrc");
    let output = dir.path().join("holdings.mrc");
    fs::write(
        &input,
        encode_records(&[bib_record("991", "Known"), bib_record("404", "Unknown")]),
    )
    .unwrap();

    let reports = run_pipeline(
        &api(),
        &input,
        &dir.path().join("work"),
        &output,
        &Settings::default(),
        &StageOptions::default(),
    )
    .unwrap();

    assert_eq!(reports[1].failures.len(), 1);
    assert_eq!(reports[1].failures[0].item, "404");
    assert_eq!(read_binary(&output).len(), 1);

    let report_path = dir.path().join("failures.json");
    write_failure_report(&report_path, &reports).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    let text = json.to_string();
    assert!(text.contains("\"resolve\""));
    assert!(text.contains("\"404\""));
}

#[test]
fn abort_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bibs.mrc");
    let work = dir.path().join("work");
    fs::write(
        &input,
        encode_records(&[bib_record("404", "Unknown"), bib_record("991", "Known")]),
    )
    .unwrap();

    let options = StageOptions {
        failure_policy: FailurePolicy::Abort,
        ..StageOptions::default()
    };
    let err = run_pipeline(
        &api(),
        &input,
        &work,
        &dir.path().join("holdings.mrc"),
        &Settings::default(),
        &options,
    )
    .unwrap_err();

    assert!(matches!(err.stop_reason(), HoldingsError::Api { item, .. } if item == "404"));
    let stages: Vec<&str> = err.reports().iter().map(|r| r.stage).collect();
    assert_eq!(stages, ["extract", "resolve"]);
    assert_eq!(err.reports()[1].failures[0].item, "404");
    let files = WorkFiles::in_dir(&work);
    assert_eq!(fs::read_to_string(files.ids).unwrap(), "404\n991\n");
    assert!(!files.holdings.exists());
}

/// Cancels the run on the first record fetch, as an interrupt would.
struct InterruptOnFetch {
    inner: FakeHoldings,
    cancel: CancellationToken,
}

impl HoldingsApi for InterruptOnFetch {
    fn list_holding_ids(&self, mms_id: &Identifier) -> ApiResult<Vec<Identifier>> {
        self.inner.list_holding_ids(mms_id)
    }

    fn fetch_holding(&self, mms_id: &Identifier, holding_id: &Identifier) -> ApiResult<Record> {
        self.cancel.cancel();
        self.inner.fetch_holding(mms_id, holding_id)
    }
}

#[test]
fn fatal_stop_keeps_earlier_failures_for_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bibs.mrc");
    let no_id = Record::builder(Leader::default())
        .field(Field::data("245", '1', '0').subfield('a', "No control number"))
        .build()
        .unwrap();
    fs::write(
        &input,
        encode_records(&[bib_record("991", "Known"), no_id, bib_record("404", "Unknown")]),
    )
    .unwrap();

    let options = StageOptions::default();
    let api = InterruptOnFetch {
        inner: api(),
        cancel: options.cancel.clone(),
    };
    let err = run_pipeline(
        &api,
        &input,
        &dir.path().join("work"),
        &dir.path().join("holdings.mrc"),
        &Settings::default(),
        &options,
    )
    .unwrap_err();

    assert!(matches!(err, HoldingsError::Stopped { stage: "fetch", .. }));
    assert!(matches!(err.stop_reason(), HoldingsError::Cancelled));
    assert_eq!(err.to_string(), "fetch stage stopped");

    let report_path = dir.path().join("failures.json");
    write_failure_report(&report_path, err.reports()).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json[0]["stage"], "extract");
    assert_eq!(json[0]["failures"][0]["item"], "record 2");
    assert_eq!(json[1]["stage"], "resolve");
    assert_eq!(json[1]["failures"][0]["item"], "404");
    assert_eq!(json[2]["stage"], "fetch");
    assert_eq!(json.as_array().unwrap().len(), 3);
}

#[test]
fn missing_input_fails_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let err = run_pipeline(
        &api(),
        &dir.path().join("absent.mrc"),
        &work,
        &dir.path().join("holdings.mrc"),
        &Settings::default(),
        &StageOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(err, HoldingsError::MissingInput(_)));
    assert!(!work.exists());
}
