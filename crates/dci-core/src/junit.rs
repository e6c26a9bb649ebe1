//! JUnit report summaries.

use quick_xml::Reader;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Counts extracted from a JUnit document. `time` is in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunitSummary {
    pub total: i64,
    pub success: i64,
    pub skips: i64,
    pub failures: i64,
    pub errors: i64,
    pub time: i64,
}

#[derive(Debug, Error)]
pub enum JunitError {
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attr(#[from] AttrError),

    #[error("invalid time value: {0}")]
    Time(String),

    #[error("root element '{0}' is not a junit testsuite")]
    NotJunit(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Skipped,
    Failure,
    Error,
}

/// Whether a file should be parsed as a JUnit report.
pub fn is_junit(name: &str, mime: Option<&str>) -> bool {
    mime == Some("application/junit") || name.to_ascii_lowercase().ends_with(".xml")
}

/// Summarize a JUnit document. Blank input yields an all-zero summary.
pub fn parse_junit(content: &[u8]) -> Result<JunitSummary, JunitError> {
    let mut summary = JunitSummary::default();
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut seen_root = false;
    let mut current: Option<Outcome> = None;
    let mut seconds = 0f64;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                check_root(&mut seen_root, &e)?;
                match e.name().as_ref() {
                    b"testcase" => {
                        seconds += testcase_time(&e)?;
                        current = Some(Outcome::Success);
                    }
                    other => mark_outcome(&mut current, other),
                }
            }
            Event::Empty(e) => {
                check_root(&mut seen_root, &e)?;
                match e.name().as_ref() {
                    b"testcase" => {
                        seconds += testcase_time(&e)?;
                        record(&mut summary, Outcome::Success);
                    }
                    other => mark_outcome(&mut current, other),
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"testcase" {
                    if let Some(outcome) = current.take() {
                        record(&mut summary, outcome);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    summary.time = (seconds * 1000.0).round() as i64;
    Ok(summary)
}

fn check_root(seen_root: &mut bool, e: &BytesStart<'_>) -> Result<(), JunitError> {
    if *seen_root {
        return Ok(());
    }
    *seen_root = true;
    match e.name().as_ref() {
        b"testsuite" | b"testsuites" => Ok(()),
        other => Err(JunitError::NotJunit(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

fn mark_outcome(current: &mut Option<Outcome>, element: &[u8]) {
    let Some(outcome) = current.as_mut() else {
        return;
    };
    match element {
        b"failure" => *outcome = Outcome::Failure,
        b"error" => *outcome = Outcome::Error,
        b"skipped" => *outcome = Outcome::Skipped,
        _ => {}
    }
}

fn testcase_time(e: &BytesStart<'_>) -> Result<f64, JunitError> {
    let Some(attr) = e.try_get_attribute("time")? else {
        return Ok(0.0);
    };
    let raw = attr.unescape_value()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .map_err(|_| JunitError::Time(raw.to_string()))
}

fn record(summary: &mut JunitSummary, outcome: Outcome) {
    summary.total += 1;
    match outcome {
        Outcome::Success => summary.success += 1,
        Outcome::Skipped => summary.skips += 1,
        Outcome::Failure => summary.failures += 1,
        Outcome::Error => summary.errors += 1,
    }
}
