//! # XML Test Report Module / XML 测试报告模块
//!
//! Reads, rewrites and synthesizes the XML reports produced by the external
//! test runner: a `testsuite` containing `testcase` entries with optional
//! failure payloads. The orchestrator prefixes testcase classnames with the
//! owning module name and injects synthetic passing or failing cases.
//!
//! 读取、重写并合成外部测试运行器产生的 XML 报告：
//! 一个包含 `testcase` 条目（可选失败负载）的 `testsuite`。
//! 编排器会为 testcase 的 classname 加上所属模块名前缀，并注入合成的通过或失败用例。

use anyhow::{Context, Result, bail};
use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFailure {
    pub message: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseEntry {
    pub classname: String,
    pub name: String,
    pub time: Option<String>,
    pub failure: Option<CaseFailure>,
}

/// One testsuite document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub suite: String,
    pub cases: Vec<TestCaseEntry>,
}

impl TestReport {
    pub fn new(suite: impl Into<String>) -> TestReport {
        TestReport {
            suite: suite.into(),
            cases: Vec::new(),
        }
    }

    /// Minimal report standing in for one the runner failed to produce.
    /// The missing file itself is surfaced as a failing case.
    pub fn missing_template(suite: &str) -> TestReport {
        let mut report = TestReport::new(suite);
        report.push_failing(
            suite,
            "report",
            "report file was not produced",
            "The test runner exited without writing its report file.",
        );
        report
    }

    /// A single synthetic passing report for a module skipped by diff-based
    /// selection.
    pub fn no_changes(suite: &str) -> TestReport {
        let mut report = TestReport::new(suite);
        report.push_passing(suite, "no changes");
        report
    }

    pub fn load(path: &Path) -> Result<TestReport> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read report: {}", path.display()))?;
        TestReport::parse(&content)
            .with_context(|| format!("Failed to parse report: {}", path.display()))
    }

    pub fn parse(xml: &str) -> Result<TestReport> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut report: Option<TestReport> = None;
        let mut open_case: Option<TestCaseEntry> = None;
        let mut in_failure = false;
        let mut failure_message = String::new();
        let mut failure_text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) | Ok(Event::Empty(element))
                    if element.name().as_ref() == b"testsuite" =>
                {
                    let name = attribute(&element, "name")?.unwrap_or_else(|| "unknown".into());
                    report = Some(TestReport::new(name));
                }
                Ok(Event::Start(element)) | Ok(Event::Empty(element))
                    if element.name().as_ref() == b"testcase" =>
                {
                    // An Empty testcase never produces an End event, so a
                    // still-open case is flushed here.
                    if let (Some(report), Some(case)) = (report.as_mut(), open_case.take()) {
                        report.cases.push(case);
                    }
                    open_case = Some(TestCaseEntry {
                        classname: attribute(&element, "classname")?.unwrap_or_default(),
                        name: attribute(&element, "name")?.unwrap_or_default(),
                        time: attribute(&element, "time")?,
                        failure: None,
                    });
                }
                Ok(Event::Start(element)) if element.name().as_ref() == b"failure" => {
                    in_failure = true;
                    failure_message = attribute(&element, "message")?.unwrap_or_default();
                    failure_text.clear();
                }
                Ok(Event::Empty(element)) if element.name().as_ref() == b"failure" => {
                    if let Some(case) = open_case.as_mut() {
                        case.failure = Some(CaseFailure {
                            message: attribute(&element, "message")?.unwrap_or_default(),
                            text: String::new(),
                        });
                    }
                }
                Ok(Event::Text(text)) => {
                    if in_failure {
                        failure_text.push_str(&text.unescape().unwrap_or_default());
                    }
                }
                Ok(Event::End(element)) => match element.name().as_ref() {
                    b"failure" => {
                        in_failure = false;
                        if let Some(case) = open_case.as_mut() {
                            case.failure = Some(CaseFailure {
                                message: std::mem::take(&mut failure_message),
                                text: std::mem::take(&mut failure_text),
                            });
                        }
                    }
                    b"testcase" => {
                        if let (Some(report), Some(case)) = (report.as_mut(), open_case.take()) {
                            report.cases.push(case);
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => bail!("invalid report xml: {e}"),
            }
        }

        let mut report = match report {
            Some(report) => report,
            None => bail!("report has no <testsuite> element"),
        };
        // An Empty testcase event never produces an End event.
        if let Some(case) = open_case.take() {
            report.cases.push(case);
        }
        Ok(report)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_xml()?)
            .with_context(|| format!("Failed to write report: {}", path.display()))
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut suite = BytesStart::new("testsuite");
        suite.push_attribute(("name", self.suite.as_str()));
        suite.push_attribute(("tests", self.cases.len().to_string().as_str()));
        suite.push_attribute(("failures", self.failures().to_string().as_str()));
        suite.push_attribute(("errors", "0"));
        suite.push_attribute(("timestamp", Utc::now().to_rfc3339().as_str()));
        writer.write_event(Event::Start(suite))?;

        for case in &self.cases {
            let mut element = BytesStart::new("testcase");
            element.push_attribute(("classname", case.classname.as_str()));
            element.push_attribute(("name", case.name.as_str()));
            if let Some(time) = &case.time {
                element.push_attribute(("time", time.as_str()));
            }

            match &case.failure {
                None => writer.write_event(Event::Empty(element))?,
                Some(failure) => {
                    writer.write_event(Event::Start(element))?;
                    let mut failure_element = BytesStart::new("failure");
                    failure_element.push_attribute(("message", failure.message.as_str()));
                    writer.write_event(Event::Start(failure_element))?;
                    writer.write_event(Event::Text(BytesText::new(&failure.text)))?;
                    writer.write_event(Event::End(BytesEnd::new("failure")))?;
                    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
                }
            }
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        let bytes = writer.into_inner();
        String::from_utf8(bytes).context("report is not valid utf-8")
    }

    /// Namespaces every testcase with the owning module or repository name.
    pub fn prefix_classnames(&mut self, owner: &str) {
        let prefix = format!("{owner}.");
        for case in &mut self.cases {
            if case.classname.is_empty() {
                case.classname = owner.to_string();
            } else if case.classname != owner && !case.classname.starts_with(&prefix) {
                case.classname = format!("{owner}.{}", case.classname);
            }
        }
    }

    pub fn push_passing(&mut self, classname: &str, name: &str) {
        self.cases.push(TestCaseEntry {
            classname: classname.to_string(),
            name: name.to_string(),
            time: None,
            failure: None,
        });
    }

    pub fn push_failing(&mut self, classname: &str, name: &str, message: &str, text: &str) {
        self.cases.push(TestCaseEntry {
            classname: classname.to_string(),
            name: name.to_string(),
            time: None,
            failure: Some(CaseFailure {
                message: message.to_string(),
                text: text.to_string(),
            }),
        });
    }

    pub fn failures(&self) -> usize {
        self.cases.iter().filter(|c| c.failure.is_some()).count()
    }
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.context("invalid attribute in report")?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
