//! Concurrent reader for delegation files.
//!
//! The input buffer is split into line-aligned sections, each scanned by its
//! own task. Tasks stream parsed entities into a single channel and the
//! [`Aggregator`] folds them into one [`RecordSet`]. Nothing in the result
//! depends on the order in which sections finish, except the order of the
//! record lists.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::parser::{LineOutcome, ParseError, SectionScanner};
use crate::record::{AsnRecord, Entity, IpRecord, RecordSet, ResourceType, VersionLine};
use crate::split::{DEFAULT_SEARCH_WINDOW, SplitError, split};
use crate::stats::ParseStats;

/// Default number of sections scanned in parallel.
pub const DEFAULT_SECTIONS: usize = 5;

/// Capacity of the channel between section tasks and the aggregator.
const EVENT_QUEUE: usize = 1024;

/// Errors that abort a read. No partial result is ever returned.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot split input: {0}")]
    Split(#[from] SplitError),

    #[error("format error: {0}")]
    Format(#[from] ParseError),

    #[error("line {line}: duplicate version line")]
    DuplicateVersion { line: usize },

    #[error("no version line found")]
    MissingVersion,

    #[error("read cancelled")]
    Cancelled,

    #[error("section task failed: {0}")]
    Task(String),
}

impl ReadError {
    /// Input line number the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ReadError::Format(e) => Some(e.line()),
            ReadError::DuplicateVersion { line } => Some(*line),
            _ => None,
        }
    }
}

/// Tuning knobs for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Number of sections scanned in parallel.
    pub sections: usize,

    /// Bytes searched for a line terminator around each section boundary.
    pub search_window: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            sections: DEFAULT_SECTIONS,
            search_window: DEFAULT_SEARCH_WINDOW,
        }
    }
}

/// Messages from section tasks to the aggregator.
#[derive(Debug)]
enum SectionEvent {
    Entity { line: usize, entity: Entity },
    Done { section: usize, lines: usize },
    Failed(ParseError),
}

/// Folds entities from any number of sections into a [`RecordSet`].
///
/// Entities may be pushed in any order. Summary counts keep the value of the
/// summary line that comes last in the file, and a duplicate version line is
/// reported at its second occurrence in file order, regardless of arrival
/// order.
#[derive(Debug, Default)]
pub struct Aggregator {
    versions: Vec<(usize, VersionLine)>,
    summaries: HashMap<ResourceType, (usize, u64)>,
    asns: Vec<AsnRecord>,
    ips: Vec<IpRecord>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity found on input line `line`.
    pub fn push(&mut self, line: usize, entity: Entity) {
        match entity {
            Entity::Version(version) => self.versions.push((line, version)),
            Entity::Summary(summary) => {
                // Summaries of types we don't know don't count anything.
                if let Some(kind) = summary.resource_type() {
                    let slot = self.summaries.entry(kind).or_insert((line, summary.count));
                    if line >= slot.0 {
                        *slot = (line, summary.count);
                    }
                }
            }
            Entity::Ip(record) => self.ips.push(record),
            Entity::Asn(record) => self.asns.push(record),
        }
    }

    /// Build the record set once every section has been pushed.
    pub fn finish(mut self) -> Result<RecordSet, ReadError> {
        self.versions.sort_by_key(|(line, _)| *line);
        let mut versions = self.versions.into_iter();
        let (_, version) = versions.next().ok_or(ReadError::MissingVersion)?;
        if let Some((line, _)) = versions.next() {
            return Err(ReadError::DuplicateVersion { line });
        }

        let declared = |kind: ResourceType| {
            self.summaries
                .get(&kind)
                .map_or(0, |(_, count)| *count)
        };

        Ok(RecordSet {
            declared_total_count: version.record_count,
            declared_asn_count: declared(ResourceType::Asn),
            declared_ipv4_count: declared(ResourceType::Ipv4),
            declared_ipv6_count: declared(ResourceType::Ipv6),
            version,
            asns: self.asns,
            ips: self.ips,
        })
    }
}

/// Reader over one complete delegation file held in memory.
pub struct Reader {
    buffer: Arc<[u8]>,
    options: ReadOptions,
    stats: Arc<ParseStats>,
}

impl Reader {
    /// Create a reader over `buffer`.
    pub fn new(buffer: impl Into<Arc<[u8]>>, options: ReadOptions) -> Self {
        Self {
            buffer: buffer.into(),
            options,
            stats: Arc::new(ParseStats::new()),
        }
    }

    /// Share a statistics collector, e.g. across several files.
    pub fn with_stats(mut self, stats: Arc<ParseStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Statistics collected by reads on this reader.
    pub fn stats(&self) -> &Arc<ParseStats> {
        &self.stats
    }

    /// Parse the whole buffer.
    pub async fn read(&self) -> Result<RecordSet, ReadError> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.read_until(cancel_rx).await
    }

    /// Parse the whole buffer, giving up as soon as `cancel` turns true.
    ///
    /// On cancellation or on the first error, outstanding section tasks are
    /// aborted before returning.
    pub async fn read_until(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RecordSet, ReadError> {
        let ranges = split(&self.buffer, self.options.sections, self.options.search_window)?;
        self.stats.record_bytes(self.buffer.len() as u64);

        let sections = ranges.len();
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
        let mut tasks = JoinSet::new();
        let mut first_line = 1;

        for (section, range) in ranges.into_iter().enumerate() {
            let line_count = self.buffer[range.clone()]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            tasks.spawn(scan_section(
                Arc::clone(&self.buffer),
                range,
                first_line,
                section,
                tx.clone(),
                Arc::clone(&self.stats),
            ));
            first_line += line_count;
        }
        drop(tx);

        let result = tokio::select! {
            result = aggregate(&mut rx, sections) => result,
            _ = wait_for_cancel(&mut cancel) => Err(ReadError::Cancelled),
        };

        drop(rx);
        join_sections(&mut tasks, result).await
    }
}

/// Wait out the section tasks, aborting them first if the read failed.
/// A panicked task replaces a `Task` error with its panic message.
async fn join_sections(
    tasks: &mut JoinSet<()>,
    result: Result<RecordSet, ReadError>,
) -> Result<RecordSet, ReadError> {
    if result.is_err() {
        tasks.abort_all();
    }

    let mut panic = None;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined
            && e.is_panic()
            && panic.is_none()
        {
            panic = Some(e.to_string());
        }
    }

    match (result, panic) {
        (Err(ReadError::Task(_)), Some(message)) => Err(ReadError::Task(message)),
        (result, _) => result,
    }
}

/// Resolve once `cancel` holds `true`. Never resolves if the sender is
/// dropped without cancelling.
pub async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn aggregate(
    rx: &mut mpsc::Receiver<SectionEvent>,
    sections: usize,
) -> Result<RecordSet, ReadError> {
    let mut aggregator = Aggregator::new();
    let mut done = 0;

    while done < sections {
        match rx.recv().await {
            Some(SectionEvent::Entity { line, entity }) => aggregator.push(line, entity),
            Some(SectionEvent::Done { section, lines }) => {
                debug!(section, lines, "Section complete");
                done += 1;
            }
            Some(SectionEvent::Failed(e)) => return Err(e.into()),
            None => {
                return Err(ReadError::Task(format!(
                    "{} of {} sections ended without completing",
                    sections - done,
                    sections
                )));
            }
        }
    }

    aggregator.finish()
}

async fn scan_section(
    buffer: Arc<[u8]>,
    range: Range<usize>,
    first_line: usize,
    section: usize,
    tx: mpsc::Sender<SectionEvent>,
    stats: Arc<ParseStats>,
) {
    debug!(
        section,
        start = range.start,
        end = range.end,
        first_line,
        "Scanning section"
    );

    let mut lines = 0;
    for item in SectionScanner::new(&buffer[range], first_line) {
        match item {
            Ok((line, outcome)) => {
                lines += 1;
                stats.record_line(&outcome);
                match outcome {
                    LineOutcome::Entity(entity) => {
                        if tx.send(SectionEvent::Entity { line, entity }).await.is_err() {
                            // Aggregator gave up
                            return;
                        }
                    }
                    LineOutcome::Dropped => warn!(line, "Dropped record line of unknown type"),
                    LineOutcome::Ignored => {}
                }
            }
            Err(e) => {
                let _ = tx.send(SectionEvent::Failed(e)).await;
                return;
            }
        }
    }

    let _ = tx.send(SectionEvent::Done { section, lines }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::{FAULTY_DATA, REGULAR_DATA};
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn options(sections: usize) -> ReadOptions {
        ReadOptions {
            sections,
            ..Default::default()
        }
    }

    async fn read(data: &str, sections: usize) -> Result<RecordSet, ReadError> {
        Reader::new(data.as_bytes(), options(sections)).read().await
    }

    fn multiset<T: std::hash::Hash + Eq + Clone>(items: &[T]) -> HashMap<T, usize> {
        let mut counts = HashMap::new();
        for item in items {
            *counts.entry(item.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[tokio::test]
    async fn test_parsing_regular_file() {
        let records = read(REGULAR_DATA, DEFAULT_SECTIONS).await.unwrap();

        assert_eq!(records.version.version, 2.3);
        assert_eq!(records.declared_total_count, 23486);
        assert_eq!(records.declared_asn_count, 3986);
        assert_eq!(records.declared_ipv4_count, 17947);
        assert_eq!(records.declared_ipv6_count, 1553);
        assert_eq!(records.asns.len(), 2);
        assert_eq!(records.ips.len(), 9);

        let asn = records.asns.iter().find(|r| r.start == 173).unwrap();
        assert_eq!(asn.record.status, "allocated");
        assert_eq!(asn.record.country_code, "JP");

        let ip = records
            .ips
            .iter()
            .find(|r| r.start == IpAddr::V4(Ipv4Addr::new(203, 81, 160, 0)))
            .unwrap();
        assert_eq!(ip.record.status, "assigned");
        assert_eq!(ip.record.value, 4096);
    }

    #[tokio::test]
    async fn test_duplicate_version_line() {
        for sections in [1, 2, 3, 5] {
            let err = read(FAULTY_DATA, sections).await.unwrap_err();
            assert!(
                matches!(err, ReadError::DuplicateVersion { line: 5 }),
                "sections={} got {:?}",
                sections,
                err
            );
            assert_eq!(err.line(), Some(5));
        }
    }

    #[tokio::test]
    async fn test_missing_version_line() {
        let data = "apnic|*|asn|*|1|summary\napnic|JP|asn|173|1|20020801|allocated\n";
        let err = read(data, 2).await.unwrap_err();
        assert!(matches!(err, ReadError::MissingVersion));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let err = read("", 5).await.unwrap_err();
        assert!(matches!(err, ReadError::MissingVersion));
    }

    #[tokio::test]
    async fn test_format_error_line_number() {
        let data = format!("{}\napnic|JP|asn|173|x|20020801|allocated\n", REGULAR_DATA);
        let expected_line = REGULAR_DATA.lines().count() + 1;
        let err = read(&data, 3).await.unwrap_err();
        assert_eq!(err.line(), Some(expected_line));
        assert!(matches!(err, ReadError::Format(ParseError::InvalidNumber { .. })));
    }

    #[tokio::test]
    async fn test_split_error_is_recoverable() {
        let mut data = String::from("2.3|apnic|20110113|0|19850701|20110112|+1000\n");
        data.push_str(&"x".repeat(1000));
        let reader = Reader::new(
            data.as_bytes(),
            ReadOptions {
                sections: 2,
                search_window: 10,
            },
        );
        assert!(matches!(reader.read().await, Err(ReadError::Split(_))));
    }

    #[tokio::test]
    async fn test_stats_collected() {
        let reader = Reader::new(REGULAR_DATA.as_bytes(), options(3));
        reader.read().await.unwrap();
        let summary = reader.stats().summary();
        assert_eq!(summary.lines as usize, REGULAR_DATA.lines().count());
        assert_eq!(summary.version_lines, 1);
        assert_eq!(summary.summary_lines, 3);
        assert_eq!(summary.ignored_lines, 2);
        assert_eq!(summary.bytes_processed as usize, REGULAR_DATA.len());
    }

    #[tokio::test]
    async fn test_cancel_large_input() {
        let mut data = String::from("2|ripencc|1|0|19930901|20240101|+0100\n");
        for i in 0..200_000u32 {
            data.push_str(&format!("ripencc|NL|asn|{}|1|20020801|allocated\n", i));
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let reader = Reader::new(data.into_bytes(), options(5));
        let result = reader.read_until(cancel_rx).await;
        assert!(matches!(result, Err(ReadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_panicked_section_reported() {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            let _tx = tx;
            panic!("section blew up");
        });

        let result = aggregate(&mut rx, 1).await;
        assert!(matches!(result, Err(ReadError::Task(_))));

        match join_sections(&mut tasks, result).await {
            Err(ReadError::Task(message)) => assert!(message.contains("panicked"), "{}", message),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_aggregator_summary_last_in_file_wins() {
        let summary = |count| {
            Entity::Summary(crate::record::SummaryLine {
                registry: "apnic".to_string(),
                kind: "ipv4".to_string(),
                count,
            })
        };
        let version = Entity::Version(VersionLine {
            version: 2.3,
            registry: "apnic".to_string(),
            serial: "1".to_string(),
            record_count: 10,
            start_date: String::new(),
            end_date: String::new(),
            utc_offset: String::new(),
        });

        let mut aggregator = Aggregator::new();
        aggregator.push(9, summary(200));
        aggregator.push(1, version);
        aggregator.push(4, summary(100));
        let records = aggregator.finish().unwrap();
        assert_eq!(records.declared_ipv4_count, 200);
        assert_eq!(records.declared_asn_count, 0);
        assert_eq!(records.declared_total_count, 10);
    }

    #[tokio::test]
    async fn test_split_invariance_sample() {
        let single = read(REGULAR_DATA, 1).await.unwrap();
        for sections in 2..10 {
            let split = read(REGULAR_DATA, sections).await.unwrap();
            assert_eq!(split.version, single.version);
            assert_eq!(split.declared_asn_count, single.declared_asn_count);
            assert_eq!(split.declared_ipv4_count, single.declared_ipv4_count);
            assert_eq!(split.declared_ipv6_count, single.declared_ipv6_count);
            assert_eq!(multiset(&split.asns), multiset(&single.asns));
            assert_eq!(multiset(&split.ips), multiset(&single.ips));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_split_invariance(
            records in prop::collection::vec((0u32..65536, 1u64..4096), 0..80),
            sections in 1usize..16,
        ) {
            let mut data = String::from("2.3|arin|1|0|19850701|20110112|-0500\n");
            data.push_str("arin|*|asn|*|7|summary\n");
            for (i, (asn, value)) in records.iter().enumerate() {
                if i % 2 == 0 {
                    data.push_str(&format!("arin|US|asn|{}|1|20020801|allocated\n", asn));
                } else {
                    data.push_str(&format!("arin|CA|ipv4|10.{}.{}.0|{}|20100122|assigned\n",
                        asn >> 8, asn & 0xff, value));
                }
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .build()
                .unwrap();
            let (single, split) = runtime.block_on(async {
                (read(&data, 1).await.unwrap(), read(&data, sections).await.unwrap())
            });

            prop_assert_eq!(split.declared_asn_count, single.declared_asn_count);
            prop_assert_eq!(multiset(&split.asns), multiset(&single.asns));
            prop_assert_eq!(multiset(&split.ips), multiset(&single.ips));
        }
    }
}
