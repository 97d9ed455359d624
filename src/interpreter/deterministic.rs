//! Rule-based interpreter: an ordered cascade of compiled patterns that maps
//! the common phrasings onto intents without calling out to a model.

use std::ops::Range;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::{Captures, Regex};

use super::dates::{self, DateRange};
use super::intent::{DashboardContext, Intent, Interpretation, Interpreter, InterpreterSource};
use crate::error::ActionError;
use crate::functions::params::{
    NoteAppendParams, RankBy, RankVendorsParams, RecordDetailParams, SearchParams,
    StatusChangeParams, SummaryParams,
};
use crate::models::{InvoiceStatus, Message};
use crate::records::RecordFilter;

const RECORD_REF: &str = r"(?P<rec>[A-Za-z]{2,6}-\d+|this\s+(?:invoice|one|record|bill))";

const EXACT: f32 = 0.95;
const FILTERED: f32 = 0.9;
const RANKING: f32 = 0.9;
const SUMMARY: f32 = 0.85;
/// Filters or a ranking were recognized, but the utterance says more than that.
const PARTIAL: f32 = 0.7;
const BARE_LISTING: f32 = 0.6;

const UNMATCHED: &str = "Sorry, I couldn't work out what you'd like to do. Try something like \
     \"show pending invoices\", \"mark INV-100 as paid\" or \"top 5 vendors\".";

const UNPAID: [InvoiceStatus; 4] = [
    InvoiceStatus::Pending,
    InvoiceStatus::InReview,
    InvoiceStatus::Approved,
    InvoiceStatus::Overdue,
];

/// Words a listing or ranking request may carry besides its filters. An
/// utterance made only of these and recognized filters is a canonical template.
const TEMPLATE_WORDS: &[&str] = &[
    "show", "list", "find", "get", "display", "give", "see", "view", "me", "us", "all", "any",
    "the", "my", "our", "of", "invoice", "invoices", "bill", "bills", "please", "that", "are",
    "with", "status", "issued", "dated", "from", "in", "a", "and", "or", "by", "total",
    "amount", "spend", "count", "number", "volume",
];

/// First words that mean a `from/by/for` phrase is not naming a vendor.
const NOT_A_VENDOR: &[&str] = &[
    "last", "past", "previous", "this", "today", "count", "total", "number", "amount", "spend",
    "volume", "status", "me", "us", "all", "my", "our", "each", "every", "vendor", "vendors",
];

struct Patterns {
    note_append: Vec<Regex>,
    status_change: Regex,
    status_verb: Regex,
    record_detail: Vec<Regex>,
    vendor_ranking: Regex,
    rank_by_count: Regex,
    summary: Regex,
    listing_noun: Regex,
    status_word: Regex,
    vendor: Regex,
    amount_between: Regex,
    amount_min: Regex,
    amount_max: Regex,
    last_n_days: Regex,
    period: Regex,
    today: Regex,
}

fn compile(pattern: &str) -> Regex {
    Regex::new(&pattern.replace("@REC", RECORD_REF)).expect("interpreter pattern")
}

impl Patterns {
    fn new() -> Self {
        Self {
            note_append: vec![
                compile(r#"(?i)^(?:please\s+)?(?:add|append|attach|leave|put)\s+(?:a\s+|the\s+|this\s+)?note\s+(?:to|on|for)\s+(?:invoice\s+)?@REC\s*(?::|,|-|saying|that\s+says)\s*(?P<note>.+)$"#),
                compile(r#"(?i)^(?:please\s+)?(?:add|append)\s+(?:the\s+)?note\s+["“'](?P<note>[^"”']+)["”']\s+(?:to|on)\s+(?:invoice\s+)?@REC\s*\.?$"#),
                compile(r"(?i)^note\s+(?:on\s+|for\s+|to\s+)?(?:invoice\s+)?@REC\s*:\s*(?P<note>.+)$"),
            ],
            status_change: compile(
                r"(?i)^(?:please\s+)?(?:can\s+you\s+)?(?:mark|set|move|change|update|put|flag)\s+(?:the\s+)?(?:status\s+of\s+)?(?:invoice\s+)?@REC(?:'s\s+status)?\s+(?:(?:as|to|into|in|status\s+to)\s+)?(?P<status>[A-Za-z][A-Za-z _-]*?)\s*[.!?]?$",
            ),
            status_verb: compile(
                r"(?i)^(?:please\s+)?(?P<verb>approve|pay|review)\s+(?:invoice\s+)?@REC\s*[.!]?$",
            ),
            record_detail: vec![
                compile(r"(?i)^(?:please\s+)?(?:show|open|view|display|get|find|pull\s+up|look\s+up)\s+(?:me\s+)?(?:the\s+)?(?:details?\s+(?:for|of|on)\s+)?(?:invoice\s+)?@REC\s*[.?!]?$"),
                compile(r"(?i)^(?:what(?:'s|\s+is)\s+(?:the\s+)?(?:status\s+of\s+)?|details?\s+(?:for|of|on)\s+|tell\s+me\s+about\s+)?(?:invoice\s+)?@REC\s*[.?!]?$"),
            ],
            vendor_ranking: compile(
                r"(?i)\b(?:top|biggest|largest|leading)\s+(?:(?P<n>\d{1,3})\s+)?(?:vendors?|suppliers?)\b|\brank(?:ing)?\s+(?:of\s+)?(?:the\s+|my\s+|our\s+)?(?:vendors?|suppliers?)\b|\b(?:vendors?|suppliers?)\s+by\s+(?:total|spend|amount|count|number)\b|\bwhich\s+(?:vendors?|suppliers?)\b.*\bmost\b",
            ),
            rank_by_count: compile(
                r"(?i)\bby\s+(?:invoice\s+)?(?:count|number|volume)\b|\bmost\s+invoices\b",
            ),
            summary: compile(
                r"(?i)\b(?:summari[sz]e|summary|totals?|how\s+many|how\s+much|stats|statistics|breakdown|overview)\b",
            ),
            listing_noun: compile(r"(?i)\b(?:invoices?|bills?)\b"),
            status_word: compile(
                r"(?i)\b(pending|in[\s_-]review|approved|paid|overdue|late|past[\s_-]due|unpaid|outstanding)\b",
            ),
            vendor: compile(
                r"(?i)\b(?:from|by|for|vendor|supplier)\s+(?P<vendor>[A-Za-z0-9][A-Za-z0-9&.' -]*?)(?:\s+(?:over|under|above|below|between|more|less|greater|at|last|past|this|in|since|before|after|that|which|with|issued|due|and|or|from|dated|during)\b|\s*[,?!;]|\s*\.?$)",
            ),
            amount_between: compile(
                r"(?i)\bbetween\s+\$?\s*(?P<lo>\d[\d,]*(?:\.\d+)?)(?P<lok>k)?\s+(?:and|to|-)\s+\$?\s*(?P<hi>\d[\d,]*(?:\.\d+)?)(?P<hik>k)?\b",
            ),
            amount_min: compile(
                r"(?i)(?:\b(?:over|above|more\s+than|greater\s+than|at\s+least|exceeding)|>=?)\s*\$?\s*(?P<n>\d[\d,]*(?:\.\d+)?)(?P<k>k)?\b",
            ),
            amount_max: compile(
                r"(?i)(?:\b(?:under|below|less\s+than|at\s+most|up\s+to)|<=?)\s*\$?\s*(?P<n>\d[\d,]*(?:\.\d+)?)(?P<k>k)?\b",
            ),
            last_n_days: compile(r"(?i)\b(?:last|past|previous)\s+(?P<n>\d{1,4})\s+days?\b"),
            period: compile(r"(?i)\b(?P<which>this|last|past|previous)\s+(?P<unit>week|month|year)\b"),
            today: compile(r"(?i)\btoday\b"),
        }
    }
}

pub struct DeterministicInterpreter {
    patterns: Patterns,
    today: Option<NaiveDate>,
}

impl Default for DeterministicInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeterministicInterpreter {
    pub fn new() -> Self {
        Self {
            patterns: Patterns::new(),
            today: None,
        }
    }

    /// Pins the date relative phrases ("last month") are resolved against.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    pub fn classify(&self, utterance: &str, context: Option<&DashboardContext>) -> Interpretation {
        let text = utterance.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return unmatched();
        }

        self.note_append(&text, context)
            .or_else(|| self.status_change(&text, context))
            .or_else(|| self.record_detail(&text, context))
            .or_else(|| self.vendor_ranking(&text))
            .or_else(|| self.summary(&text))
            .or_else(|| self.search(&text))
            .unwrap_or_else(unmatched)
    }

    fn note_append(&self, text: &str, context: Option<&DashboardContext>) -> Option<Interpretation> {
        let caps = self.patterns.note_append.iter().find_map(|re| re.captures(text))?;
        let note = caps["note"]
            .trim()
            .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”'))
            .trim()
            .to_string();
        Some(with_record(&caps, context, |record_id| {
            Intent::ProposeNoteAppend(NoteAppendParams { record_id, note })
        }))
    }

    fn status_change(&self, text: &str, context: Option<&DashboardContext>) -> Option<Interpretation> {
        if let Some(caps) = self.patterns.status_change.captures(text) {
            let spoken = caps["status"].trim().to_string();
            let Some(to) = InvoiceStatus::parse_loose(&spoken) else {
                let known: Vec<&str> = InvoiceStatus::ALL.iter().map(|s| s.as_str()).collect();
                return Some(Interpretation::new(
                    Intent::unrecognized(format!(
                        "Sorry, \"{}\" isn't an invoice status. Statuses are: {}.",
                        spoken,
                        known.join(", ")
                    )),
                    0.0,
                    InterpreterSource::Deterministic,
                ));
            };
            return Some(with_record(&caps, context, |record_id| {
                Intent::ProposeStatusChange(StatusChangeParams { record_id, to })
            }));
        }

        let caps = self.patterns.status_verb.captures(text)?;
        let to = match caps["verb"].to_lowercase().as_str() {
            "approve" => InvoiceStatus::Approved,
            "pay" => InvoiceStatus::Paid,
            _ => InvoiceStatus::InReview,
        };
        Some(with_record(&caps, context, |record_id| {
            Intent::ProposeStatusChange(StatusChangeParams { record_id, to })
        }))
    }

    fn record_detail(&self, text: &str, context: Option<&DashboardContext>) -> Option<Interpretation> {
        let caps = self.patterns.record_detail.iter().find_map(|re| re.captures(text))?;
        Some(with_record(&caps, context, |record_id| {
            Intent::RecordDetail(RecordDetailParams { record_id })
        }))
    }

    fn vendor_ranking(&self, text: &str) -> Option<Interpretation> {
        let caps = self.patterns.vendor_ranking.captures(text)?;
        let limit = caps.name("n").and_then(|n| n.as_str().parse().ok());
        let by = if self.patterns.rank_by_count.is_match(text) {
            RankBy::Count
        } else {
            RankBy::Total
        };
        let mut spans: Vec<Range<usize>> = self
            .patterns
            .vendor_ranking
            .find_iter(text)
            .chain(self.patterns.rank_by_count.find_iter(text))
            .map(|m| m.range())
            .collect();
        spans.extend(self.filter_spans(text));
        let confidence = if only_template_words(text, &spans) {
            RANKING
        } else {
            PARTIAL
        };
        Some(Interpretation::new(
            Intent::VendorRanking(RankVendorsParams {
                filter: self.extract_filter(text),
                by,
                limit,
            }),
            confidence,
            InterpreterSource::Deterministic,
        ))
    }

    fn summary(&self, text: &str) -> Option<Interpretation> {
        if !self.patterns.summary.is_match(text) {
            return None;
        }
        Some(Interpretation::new(
            Intent::Summary(SummaryParams {
                filter: self.extract_filter(text),
            }),
            SUMMARY,
            InterpreterSource::Deterministic,
        ))
    }

    fn search(&self, text: &str) -> Option<Interpretation> {
        let filter = self.extract_filter(text);
        let confidence = if !filter.is_empty() {
            if only_template_words(text, &self.filter_spans(text)) {
                FILTERED
            } else {
                PARTIAL
            }
        } else if self.patterns.listing_noun.is_match(text) {
            BARE_LISTING
        } else {
            return None;
        };
        Some(Interpretation::new(
            Intent::Search(SearchParams {
                filter,
                limit: None,
            }),
            confidence,
            InterpreterSource::Deterministic,
        ))
    }

    fn extract_filter(&self, text: &str) -> RecordFilter {
        let mut filter = RecordFilter::default();

        for caps in self.patterns.status_word.captures_iter(text) {
            let word = caps[1].to_lowercase();
            if word == "unpaid" || word == "outstanding" {
                filter.statuses.extend(UNPAID);
            } else if let Some(status) = InvoiceStatus::parse_loose(&word) {
                filter.statuses.push(status);
            }
        }
        filter.statuses.sort();
        filter.statuses.dedup();

        if let Some((vendor, _)) = self.vendor_phrase(text) {
            filter.vendors.push(vendor);
        }

        if let Some(caps) = self.patterns.amount_between.captures(text) {
            filter.amount_min = parse_amount(&caps["lo"], caps.name("lok").is_some());
            filter.amount_max = parse_amount(&caps["hi"], caps.name("hik").is_some());
        } else {
            if let Some(caps) = self.patterns.amount_min.captures(text) {
                filter.amount_min = parse_amount(&caps["n"], caps.name("k").is_some());
            }
            if let Some(caps) = self.patterns.amount_max.captures(text) {
                filter.amount_max = parse_amount(&caps["n"], caps.name("k").is_some());
            }
        }

        if let Some(range) = self.extract_dates(text) {
            filter.date_from = Some(range.from);
            filter.date_to = Some(range.to);
        }
        filter
    }

    /// The first `from/by/for VENDOR` phrase naming a plausible vendor, with
    /// the span from the preposition to the end of the name.
    fn vendor_phrase(&self, text: &str) -> Option<(String, Range<usize>)> {
        self.patterns.vendor.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.name("vendor")?;
            let vendor = name.as_str().trim();
            self.looks_like_vendor(vendor)
                .then(|| (vendor.to_string(), whole.start()..name.end()))
        })
    }

    /// Byte spans of everything `extract_filter` can recognize.
    fn filter_spans(&self, text: &str) -> Vec<Range<usize>> {
        let p = &self.patterns;
        let mut spans: Vec<Range<usize>> = [
            &p.status_word,
            &p.amount_between,
            &p.amount_min,
            &p.amount_max,
            &p.last_n_days,
            &p.period,
            &p.today,
        ]
        .into_iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.range()))
        .collect();
        spans.extend(self.vendor_phrase(text).map(|(_, span)| span));
        spans
    }

    fn extract_dates(&self, text: &str) -> Option<DateRange> {
        let today = self.today();
        if let Some(caps) = self.patterns.last_n_days.captures(text) {
            let n: u32 = caps["n"].parse().ok()?;
            return Some(dates::last_n_days(today, n));
        }
        if let Some(caps) = self.patterns.period.captures(text) {
            let current = caps["which"].eq_ignore_ascii_case("this");
            return match (current, caps["unit"].to_lowercase().as_str()) {
                (true, "week") => Some(dates::this_week(today)),
                (false, "week") => Some(dates::last_week(today)),
                (true, "month") => dates::this_month(today),
                (false, "month") => dates::last_month(today),
                (true, _) => dates::this_year(today),
                (false, _) => dates::last_year(today),
            };
        }
        if self.patterns.today.is_match(text) {
            return Some(dates::today(today));
        }
        None
    }

    fn looks_like_vendor(&self, candidate: &str) -> bool {
        let lower = candidate.to_lowercase();
        let Some(first) = lower.split_whitespace().next() else {
            return false;
        };
        if NOT_A_VENDOR.contains(&first) || lower == "the" {
            return false;
        }
        !self.patterns.listing_noun.is_match(candidate) && !self.patterns.status_word.is_match(candidate)
    }
}

#[async_trait]
impl Interpreter for DeterministicInterpreter {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn interpret(
        &self,
        utterance: &str,
        _history: &[Message],
        context: Option<&DashboardContext>,
    ) -> Result<Interpretation, ActionError> {
        Ok(self.classify(utterance, context))
    }
}

fn unmatched() -> Interpretation {
    Interpretation::new(
        Intent::unrecognized(UNMATCHED),
        0.0,
        InterpreterSource::Deterministic,
    )
}

/// Resolves the `rec` capture ("INV-100" or "this invoice") and builds the intent.
fn with_record(
    caps: &Captures<'_>,
    context: Option<&DashboardContext>,
    build: impl FnOnce(String) -> Intent,
) -> Interpretation {
    let reference = &caps["rec"];
    let record_id = if reference.to_lowercase().starts_with("this") {
        context
            .and_then(|c| c.single_selection())
            .map(|id| id.to_uppercase())
    } else {
        Some(reference.to_uppercase())
    };

    let intent = match record_id {
        Some(id) => build(id),
        None => Intent::unrecognized(
            "Which invoice do you mean? Select a single invoice or name it, like INV-100.",
        ),
    };
    Interpretation::new(intent, EXACT, InterpreterSource::Deterministic)
}

/// True when nothing outside `spans` but template words remains.
fn only_template_words(text: &str, spans: &[Range<usize>]) -> bool {
    let residue: String = text
        .char_indices()
        .map(|(i, c)| if spans.iter().any(|s| s.contains(&i)) { ' ' } else { c })
        .collect();
    residue
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|word| !word.is_empty())
        .all(|word| TEMPLATE_WORDS.contains(&word.to_lowercase().as_str()))
}

fn parse_amount(digits: &str, thousands: bool) -> Option<f64> {
    let value: f64 = digits.replace(',', "").parse().ok()?;
    Some(if thousands { value * 1000.0 } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::intent::CANONICAL_CONFIDENCE;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn interpreter() -> DeterministicInterpreter {
        DeterministicInterpreter::new().with_today(d("2026-10-19"))
    }

    fn intent(text: &str) -> Intent {
        interpreter().classify(text, None).intent
    }

    #[test]
    fn test_pending_invoices_is_canonical_search() {
        let result = interpreter().classify("pending invoices", None);
        assert!(result.confidence >= CANONICAL_CONFIDENCE);
        assert_eq!(
            result.intent,
            Intent::Search(SearchParams {
                filter: RecordFilter {
                    statuses: vec![InvoiceStatus::Pending],
                    ..Default::default()
                },
                limit: None,
            })
        );
    }

    #[test]
    fn test_amount_vendor_and_last_month() {
        let Intent::Search(params) = intent("invoices over $500 from Acme last month") else {
            panic!("expected search");
        };
        assert_eq!(params.filter.amount_min, Some(500.0));
        assert_eq!(params.filter.vendors, vec!["Acme".to_string()]);
        assert_eq!(params.filter.date_from, Some(d("2026-09-01")));
        assert_eq!(params.filter.date_to, Some(d("2026-09-30")));
        assert!(params.filter.statuses.is_empty());
    }

    #[test]
    fn test_amount_ranges() {
        let Intent::Search(p) = intent("show invoices between $1,000 and 2.5k") else {
            panic!("expected search");
        };
        assert_eq!((p.filter.amount_min, p.filter.amount_max), (Some(1000.0), Some(2500.0)));

        let Intent::Search(p) = intent("overdue invoices under 200") else {
            panic!("expected search");
        };
        assert_eq!(p.filter.statuses, vec![InvoiceStatus::Overdue]);
        assert_eq!(p.filter.amount_max, Some(200.0));
        assert_eq!(p.filter.amount_min, None);
    }

    #[test]
    fn test_status_change_phrasings() {
        let expected = |id: &str, to| {
            Intent::ProposeStatusChange(StatusChangeParams {
                record_id: id.to_string(),
                to,
            })
        };
        assert_eq!(intent("mark invoice INV-100 as paid"), expected("INV-100", InvoiceStatus::Paid));
        assert_eq!(intent("Set inv-7 to In Review."), expected("INV-7", InvoiceStatus::InReview));
        assert_eq!(intent("approve INV-12"), expected("INV-12", InvoiceStatus::Approved));
        let result = interpreter().classify("mark INV-100 as paid", None);
        assert!(result.confidence >= CANONICAL_CONFIDENCE);
    }

    #[test]
    fn test_unknown_status_is_not_canonical() {
        let result = interpreter().classify("mark INV-100 as shipped", None);
        assert!(result.intent.is_unrecognized());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_note_append_keeps_original_case() {
        assert_eq!(
            intent("add a note to INV-100: Paid by wire, ref 88A"),
            Intent::ProposeNoteAppend(NoteAppendParams {
                record_id: "INV-100".to_string(),
                note: "Paid by wire, ref 88A".to_string(),
            })
        );
        assert_eq!(
            intent("add note \"call Dana on Monday\" to INV-3"),
            Intent::ProposeNoteAppend(NoteAppendParams {
                record_id: "INV-3".to_string(),
                note: "call Dana on Monday".to_string(),
            })
        );
    }

    #[test]
    fn test_record_detail() {
        let expected = Intent::RecordDetail(RecordDetailParams {
            record_id: "INV-100".to_string(),
        });
        assert_eq!(intent("show INV-100"), expected);
        assert_eq!(intent("what's the status of invoice inv-100?"), expected);
        assert_eq!(intent("INV-100"), expected);
    }

    #[test]
    fn test_this_invoice_uses_single_selection() {
        let context = DashboardContext {
            selected_record_ids: vec!["INV-42".to_string()],
            active_filter: None,
        };
        let result = interpreter().classify("mark this invoice as approved", Some(&context));
        assert_eq!(
            result.intent,
            Intent::ProposeStatusChange(StatusChangeParams {
                record_id: "INV-42".to_string(),
                to: InvoiceStatus::Approved,
            })
        );

        let result = interpreter().classify("mark this invoice as approved", None);
        assert!(result.intent.is_unrecognized());
    }

    #[test]
    fn test_vendor_ranking() {
        assert_eq!(
            intent("top 5 vendors by count"),
            Intent::VendorRanking(RankVendorsParams {
                filter: RecordFilter::default(),
                by: RankBy::Count,
                limit: Some(5),
            })
        );
        let Intent::VendorRanking(p) = intent("biggest vendors this year") else {
            panic!("expected ranking");
        };
        assert_eq!(p.by, RankBy::Total);
        assert_eq!(p.filter.date_from, Some(d("2026-01-01")));
    }

    #[test]
    fn test_summary_with_status() {
        let result = interpreter().classify("summarize overdue invoices", None);
        assert_eq!(result.confidence, SUMMARY);
        assert_eq!(
            result.intent,
            Intent::Summary(SummaryParams {
                filter: RecordFilter {
                    statuses: vec![InvoiceStatus::Overdue],
                    ..Default::default()
                },
            })
        );
    }

    #[test]
    fn test_unpaid_expands_and_date_words() {
        let Intent::Search(p) = intent("unpaid invoices from the last 30 days") else {
            panic!("expected search");
        };
        assert_eq!(p.filter.statuses, UNPAID.to_vec());
        assert!(p.filter.vendors.is_empty());
        assert_eq!(p.filter.date_from, Some(d("2026-09-20")));
    }

    #[test]
    fn test_bare_listing_is_low_confidence() {
        let result = interpreter().classify("show me all invoices", None);
        assert_eq!(result.confidence, BARE_LISTING);
        assert!(matches!(result.intent, Intent::Search(ref p) if p.filter.is_empty()));
    }

    #[test]
    fn test_filtered_templates_are_canonical() {
        for text in [
            "show overdue invoices from Acme",
            "list paid bills over $500 last month",
            "unpaid invoices from the last 30 days",
            "top 5 vendors by count",
        ] {
            let result = interpreter().classify(text, None);
            assert!(result.confidence >= CANONICAL_CONFIDENCE, "{}", text);
        }
    }

    #[test]
    fn test_keywords_inside_free_text_are_not_canonical() {
        for text in [
            "why was INV-300 marked paid twice?",
            "mark INV-100 as paid and add a note to INV-200: wired",
            "can you explain what happened with the overdue ones from Acme, were they disputed?",
            "which vendors did we pay the most and why did it go up?",
        ] {
            let result = interpreter().classify(text, None);
            assert!(result.confidence < CANONICAL_CONFIDENCE, "{}", text);
        }

        let result = interpreter().classify("why was INV-300 marked paid twice?", None);
        assert_eq!(result.confidence, PARTIAL);
        assert!(matches!(result.intent, Intent::Search(ref p) if p.filter.statuses == vec![InvoiceStatus::Paid]));
    }

    #[test]
    fn test_unrelated_text_is_unrecognized() {
        let result = interpreter().classify("what's the weather like?", None);
        assert!(result.intent.is_unrecognized());
        assert_eq!(result.confidence, 0.0);
        assert!(interpreter().classify("   ", None).intent.is_unrecognized());
    }
}
