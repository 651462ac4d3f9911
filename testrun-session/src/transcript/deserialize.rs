// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read a transcript back into a test tree.
//!
//! Decoding happens in two passes. The XML is first parsed into a small node
//! tree, which is then replayed in pre-order through the same
//! [`TreeBuilder`] the live protocol uses, with every suite announcing its
//! number of children.

use super::{ImportMonitor, ImportOptions, ImportedRun, tags::*};
use crate::{
    errors::TranscriptImportError,
    session::{RunCounters, builder::TreeBuilder},
    status::Status,
    tree::{ElementIndex, NewElement, TestTree},
};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use tracing::debug;

#[derive(Clone, Debug, Default)]
struct RunNode {
    name: Option<String>,
    project: Option<String>,
    time: Option<f64>,
    include_tags: Option<String>,
    exclude_tags: Option<String>,
    children: Vec<ElementNode>,
}

#[derive(Clone, Debug, Default)]
struct ElementNode {
    is_suite: bool,
    name: String,
    classname: Option<String>,
    package: Option<String>,
    id: Option<String>,
    display_name: Option<String>,
    parameters: Option<String>,
    unique_id: Option<String>,
    time: Option<f64>,
    incomplete: bool,
    ignored: bool,
    dynamic: bool,
    outcome: Option<OutcomeNode>,
    children: Vec<ElementNode>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OutcomeKind {
    Failure,
    Error,
    Skipped,
}

#[derive(Clone, Debug)]
struct OutcomeNode {
    kind: OutcomeKind,
    message: Option<String>,
    text: String,
    seen_child: bool,
    expected: Option<String>,
    actual: Option<String>,
}

#[derive(Debug)]
enum Frame {
    Run(RunNode),
    Element(ElementNode),
    Outcome(OutcomeNode),
    Expected(String),
    Actual(String),
    Unknown,
}

pub(super) fn deserialize_run(
    text: &str,
    location: &str,
    options: &ImportOptions,
    monitor: &dyn ImportMonitor,
) -> Result<ImportedRun, TranscriptImportError> {
    let run = parse_nodes(text, location, options, monitor)?;
    Ok(replay(run, options))
}

struct LineProgress<'a> {
    text: &'a [u8],
    position: usize,
    pending_lines: usize,
    interval: usize,
    monitor: &'a dyn ImportMonitor,
}

impl LineProgress<'_> {
    fn advance(&mut self, position: usize) {
        let position = position.min(self.text.len());
        if position <= self.position {
            return;
        }
        self.pending_lines += self.text[self.position..position]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        self.position = position;
        if self.pending_lines >= self.interval {
            self.monitor.worked(self.pending_lines);
            self.pending_lines = 0;
        }
    }

    fn flush(&mut self) {
        if self.pending_lines > 0 {
            self.monitor.worked(self.pending_lines);
            self.pending_lines = 0;
        }
    }
}

fn parse_nodes(
    text: &str,
    location: &str,
    options: &ImportOptions,
    monitor: &dyn ImportMonitor,
) -> Result<RunNode, TranscriptImportError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Frame> = Vec::new();
    let mut run = None;
    let mut progress = LineProgress {
        text: text.as_bytes(),
        position: 0,
        pending_lines: 0,
        interval: options.progress_interval.max(1),
        monitor,
    };

    let xml_error = |reader: &Reader<&[u8]>, error: quick_xml::Error| TranscriptImportError::Xml {
        location: location.to_owned(),
        position: reader.buffer_position(),
        error,
    };

    loop {
        let event = reader
            .read_event()
            .map_err(|error| xml_error(&reader, error))?;
        progress.advance(reader.buffer_position());

        match event {
            Event::Start(start) => {
                if monitor.is_cancelled() {
                    return Err(TranscriptImportError::Cancelled {
                        location: location.to_owned(),
                    });
                }
                let frame = start_frame(&mut stack, &start)
                    .map_err(|error| xml_error(&reader, error))?;
                stack.push(frame);
            }
            Event::Empty(start) => {
                if monitor.is_cancelled() {
                    return Err(TranscriptImportError::Cancelled {
                        location: location.to_owned(),
                    });
                }
                let frame = start_frame(&mut stack, &start)
                    .map_err(|error| xml_error(&reader, error))?;
                close_frame(&mut stack, frame, &mut run);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|error| xml_error(&reader, error))?;
                append_text(&mut stack, &text);
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data);
                append_text(&mut stack, &text);
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    close_frame(&mut stack, frame, &mut run);
                }
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) | Event::Comment(_) => {}
        }
    }
    progress.flush();

    // A bare <testsuite> root leaves its implicit run frame behind.
    if run.is_none()
        && stack.len() == 1
        && let Some(Frame::Run(node)) = stack.pop()
    {
        run = Some(node);
    }

    run.ok_or_else(|| TranscriptImportError::Malformed {
        location: location.to_owned(),
        message: format!("no <{TESTRUN_TAG}> or <{TESTSUITES_TAG}> root element"),
    })
}

fn start_frame(stack: &mut Vec<Frame>, start: &BytesStart<'_>) -> Result<Frame, quick_xml::Error> {
    let name = start.name();
    let name = name.as_ref();

    let frame = match (stack.last(), name) {
        (None, name) if name == TESTRUN_TAG.as_bytes() || name == TESTSUITES_TAG.as_bytes() => {
            Frame::Run(parse_run_attributes(start)?)
        }
        (None, name) if name == TESTSUITE_TAG.as_bytes() => {
            // A plain JUnit report with a single suite at the top.
            stack.push(Frame::Run(RunNode::default()));
            Frame::Element(parse_element_attributes(start, true)?)
        }
        (Some(Frame::Run(_) | Frame::Element(_)), name)
            if name == TESTSUITE_TAG.as_bytes() || name == TESTCASE_TAG.as_bytes() =>
        {
            Frame::Element(parse_element_attributes(
                start,
                name == TESTSUITE_TAG.as_bytes(),
            )?)
        }
        (Some(Frame::Element(_)), name) => match outcome_kind(name) {
            Some(kind) => {
                Frame::Outcome(OutcomeNode {
                    kind,
                    message: attribute_value(start, MESSAGE_ATTR)?,
                    text: String::new(),
                    seen_child: false,
                    expected: None,
                    actual: None,
                })
            }
            None => Frame::Unknown,
        },
        (Some(Frame::Outcome(_)), name) if name == EXPECTED_TAG.as_bytes() => {
            Frame::Expected(String::new())
        }
        (Some(Frame::Outcome(_)), name) if name == ACTUAL_TAG.as_bytes() => {
            Frame::Actual(String::new())
        }
        _ => Frame::Unknown,
    };

    if let (Frame::Expected(_) | Frame::Actual(_), Some(Frame::Outcome(outcome))) =
        (&frame, stack.last_mut())
    {
        // Indentation before the first child isn't part of the trace.
        if outcome.text.trim().is_empty() {
            outcome.text.clear();
        }
        outcome.seen_child = true;
    }
    Ok(frame)
}

fn outcome_kind(name: &[u8]) -> Option<OutcomeKind> {
    if name == FAILURE_TAG.as_bytes() {
        Some(OutcomeKind::Failure)
    } else if name == ERROR_TAG.as_bytes() {
        Some(OutcomeKind::Error)
    } else if name == SKIPPED_TAG.as_bytes() || name == ABORTED_TAG.as_bytes() {
        Some(OutcomeKind::Skipped)
    } else {
        None
    }
}

fn append_text(stack: &mut [Frame], text: &str) {
    match stack.last_mut() {
        Some(Frame::Outcome(outcome)) => {
            if outcome.seen_child && text.trim().is_empty() {
                return;
            }
            outcome.text.push_str(text);
        }
        Some(Frame::Expected(buffer) | Frame::Actual(buffer)) => buffer.push_str(text),
        _ => {}
    }
}

fn close_frame(stack: &mut [Frame], frame: Frame, run: &mut Option<RunNode>) {
    match (stack.last_mut(), frame) {
        (None, Frame::Run(node)) => *run = Some(node),
        (Some(Frame::Run(parent)), Frame::Element(node)) => parent.children.push(node),
        (Some(Frame::Element(parent)), Frame::Element(node)) => parent.children.push(node),
        (Some(Frame::Element(parent)), Frame::Outcome(outcome)) => {
            if parent.outcome.is_some() {
                debug!("ignoring additional outcome for {}", parent.name);
            } else {
                parent.outcome = Some(outcome);
            }
        }
        (Some(Frame::Outcome(outcome)), Frame::Expected(text)) => outcome.expected = Some(text),
        (Some(Frame::Outcome(outcome)), Frame::Actual(text)) => outcome.actual = Some(text),
        _ => {}
    }
}

fn attribute_value(start: &BytesStart<'_>, key: &str) -> Result<Option<String>, quick_xml::Error> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_run_attributes(start: &BytesStart<'_>) -> Result<RunNode, quick_xml::Error> {
    let mut run = RunNode::default();
    for attr in start.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            key if key == NAME_ATTR.as_bytes() => run.name = Some(value),
            key if key == PROJECT_ATTR.as_bytes() => run.project = Some(value),
            key if key == TIME_ATTR.as_bytes() => run.time = parse_time(&value),
            key if key == INCLUDE_TAGS_ATTR.as_bytes() => run.include_tags = Some(value),
            key if key == EXCLUDE_TAGS_ATTR.as_bytes() => run.exclude_tags = Some(value),
            // Counters are recomputed from the elements.
            _ => {}
        }
    }
    Ok(run)
}

fn parse_element_attributes(
    start: &BytesStart<'_>,
    is_suite: bool,
) -> Result<ElementNode, quick_xml::Error> {
    let mut node = ElementNode {
        is_suite,
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            key if key == NAME_ATTR.as_bytes() => node.name = value,
            key if key == CLASSNAME_ATTR.as_bytes() => node.classname = Some(value),
            key if key == PACKAGE_ATTR.as_bytes() => node.package = Some(value),
            key if key == ID_ATTR.as_bytes() => node.id = Some(value),
            key if key == DISPLAY_NAME_ATTR.as_bytes() => node.display_name = Some(value),
            key if key == PARAMETERS_ATTR.as_bytes() => node.parameters = Some(value),
            key if key == UNIQUE_ID_ATTR.as_bytes() => node.unique_id = Some(value),
            key if key == TIME_ATTR.as_bytes() => node.time = parse_time(&value),
            key if key == INCOMPLETE_ATTR.as_bytes() => node.incomplete = value == "true",
            key if key == IGNORED_ATTR.as_bytes() => node.ignored = value == "true",
            key if key == DYNAMIC_TEST_ATTR.as_bytes() => node.dynamic = value == "true",
            _ => {}
        }
    }
    Ok(node)
}

fn parse_time(value: &str) -> Option<f64> {
    match value.trim().parse::<f64>() {
        Ok(time) if time >= 0.0 => Some(time),
        _ => {
            debug!("ignoring malformed time {value:?}");
            None
        }
    }
}

struct Replay {
    tree: TestTree,
    builder: TreeBuilder,
    counters: RunCounters,
    next_id: usize,
}

fn replay(run: RunNode, options: &ImportOptions) -> ImportedRun {
    let RunNode {
        name,
        project,
        time,
        include_tags,
        exclude_tags,
        children,
    } = run;

    let root_name = name.clone().unwrap_or_else(|| options.root_name.clone());
    let mut replay = Replay {
        tree: TestTree::new(root_name),
        builder: TreeBuilder::new(),
        counters: RunCounters::default(),
        next_id: 0,
    };
    if let Some(time) = time {
        replay.tree.set_elapsed_seconds(ElementIndex::ROOT, time);
    }
    for child in children {
        replay.element(child);
    }
    replay.builder.finish();

    ImportedRun {
        name,
        project,
        include_tags,
        exclude_tags,
        tree: replay.tree,
        counters: replay.counters,
    }
}

impl Replay {
    fn element(&mut self, node: ElementNode) {
        let ElementNode {
            is_suite,
            name,
            classname,
            package,
            id,
            display_name,
            parameters,
            unique_id,
            time,
            incomplete,
            ignored,
            dynamic,
            outcome,
            children,
        } = node;

        let test_name = match (is_suite, classname, package) {
            (false, Some(classname), _) => format!("{name}({classname})"),
            (true, _, Some(package)) => format!("{package}.{name}"),
            _ => name,
        };
        let id = id.unwrap_or_else(|| {
            self.next_id += 1;
            format!("{}", self.next_id)
        });
        let new = NewElement {
            id,
            display_name: display_name.filter(|display_name| *display_name != test_name),
            test_name,
            parameter_types: parameters
                .filter(|parameters| !parameters.is_empty())
                .map(|parameters| parameters.split(',').map(str::to_owned).collect()),
            unique_id,
        };

        let index = self
            .builder
            .add_announced(&mut self.tree, new, is_suite, children.len());
        if dynamic {
            self.tree.set_dynamic(index, true);
        }
        if let Some(time) = time {
            self.tree.set_elapsed_seconds(index, time);
        }
        if ignored {
            self.tree.set_ignored(index, true);
        }
        if let Some(outcome) = outcome {
            self.outcome(index, is_suite, outcome);
        }

        for child in children {
            self.element(child);
        }

        self.register_test_ended(index, !incomplete);
    }

    fn outcome(&mut self, index: ElementIndex, is_suite: bool, outcome: OutcomeNode) {
        let OutcomeNode {
            kind,
            message,
            text,
            expected,
            actual,
            ..
        } = outcome;
        // The element's text is the full trace; the message is only a summary.
        let trace = if text.trim().is_empty() {
            message.filter(|message| !message.is_empty())
        } else {
            Some(text)
        };

        match kind {
            OutcomeKind::Failure | OutcomeKind::Error => {
                let status = if kind == OutcomeKind::Error {
                    Status::Error
                } else {
                    Status::Failure
                };
                self.register_failure(index, status, trace, expected, actual);
            }
            OutcomeKind::Skipped if is_suite || trace.is_some() => {
                self.tree.set_assumption_failed(index, true);
                self.tree.set_failure(index, Status::Ok, trace, None, None, 0.0);
            }
            OutcomeKind::Skipped => self.tree.set_ignored(index, true),
        }
    }

    fn register_failure(
        &mut self,
        index: ElementIndex,
        status: Status,
        trace: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    ) {
        let expected = expected.filter(|expected| !expected.is_empty());
        let actual = actual.filter(|actual| !actual.is_empty());
        self.tree.set_failure(index, status, trace, expected, actual, 0.0);
        self.counters.count_failure(&self.tree[index], status);
    }

    fn register_test_ended(&mut self, index: ElementIndex, completed: bool) {
        let element = &self.tree[index];
        let is_case = !element.is_suite();
        let ignored = element.is_ignored();
        let already_failed = element.own_status().is_error_or_failure();
        let assumption_failed = element.is_assumption_failure();

        if is_case {
            self.counters.total += 1;
            if completed {
                self.counters.started += 1;
                if ignored {
                    self.counters.ignored += 1;
                }
                if !already_failed {
                    self.tree.set_status_at(index, Status::Ok, 0.0);
                }
            }
        }
        if assumption_failed {
            self.counters.assumption_failures += 1;
        }
    }
}
