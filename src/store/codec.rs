//! Row codec for message logs
//!
//! Logs are delimited text: a header row, then one row per entry with the
//! columns `time_delta`, `mqtt_topic`, `message`. Every field is wrapped in
//! the quote character (a backtick by default) and a quote inside a field is
//! doubled, so topics and payloads may contain delimiters, newlines and quote
//! characters without breaking row boundaries. Rows end with `\r\n`; the
//! reader also accepts bare `\n` or `\r`.
//!
//! Reading is lenient in the same places common CSV readers are: whitespace
//! before a field is skipped, unquoted fields are accepted, blank lines are
//! ignored and columns are matched by header name.

use crate::error::{ReplayError, Result};
use crate::types::LogEntry;

/// Default field delimiter
pub const FIELD_DELIMITER: char = ',';

/// Default quote character
pub const QUOTE_CHAR: char = '`';

/// Row terminator used when writing
pub const LINE_TERMINATOR: &str = "\r\n";

/// Header column names, in write order
pub const COLUMNS: [&str; 3] = ["time_delta", "mqtt_topic", "message"];

/// One parsed row, before interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based line the record starts on
    pub line: usize,
    /// Unquoted field values
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    StartField,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Encoder/decoder for the log row format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCodec {
    delimiter: char,
    quote: char,
}

impl Default for LogCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCodec {
    /// Codec with the default delimiter and quote character
    pub fn new() -> Self {
        Self {
            delimiter: FIELD_DELIMITER,
            quote: QUOTE_CHAR,
        }
    }

    /// The header row, including the terminator
    pub fn header(&self) -> String {
        let mut row = String::new();
        for (i, column) in COLUMNS.iter().enumerate() {
            if i > 0 {
                row.push(self.delimiter);
            }
            self.push_field(&mut row, column);
        }
        row.push_str(LINE_TERMINATOR);
        row
    }

    /// Encode one entry as a row, including the terminator
    ///
    /// The payload must be valid UTF-8 since the format is text.
    pub fn encode(&self, entry: &LogEntry) -> Result<String> {
        let message = std::str::from_utf8(&entry.message).map_err(|e| {
            ReplayError::Append(format!(
                "payload on topic '{}' is not valid UTF-8: {}",
                entry.topic, e
            ))
        })?;

        // Debug formatting keeps a decimal point and round-trips exactly
        let time_delta = format!("{:?}", entry.time_delta);

        let mut row = String::with_capacity(time_delta.len() + entry.topic.len() + message.len() + 10);
        self.push_field(&mut row, &time_delta);
        row.push(self.delimiter);
        self.push_field(&mut row, &entry.topic);
        row.push(self.delimiter);
        self.push_field(&mut row, message);
        row.push_str(LINE_TERMINATOR);
        Ok(row)
    }

    fn push_field(&self, row: &mut String, value: &str) {
        row.push(self.quote);
        for ch in value.chars() {
            if ch == self.quote {
                row.push(self.quote);
            }
            row.push(ch);
        }
        row.push(self.quote);
    }

    /// Split text into records, honoring quoting
    ///
    /// Blank lines produce no record. An unterminated quoted field is a
    /// parse error.
    pub fn split_records(&self, text: &str) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut fields: Vec<String> = Vec::new();
        let mut field = String::new();
        let mut state = ParseState::StartField;
        let mut line = 1usize;
        let mut record_line = 1usize;

        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            let is_break = ch == '\n' || ch == '\r';
            if ch == '\r' && chars.peek() == Some(&'\n') {
                // Fold \r\n into the following \n so it counts once
                if state == ParseState::Quoted {
                    field.push(ch);
                }
                continue;
            }

            match state {
                ParseState::StartField => {
                    if is_break {
                        if !fields.is_empty() {
                            fields.push(std::mem::take(&mut field));
                            records.push(RawRecord {
                                line: record_line,
                                fields: std::mem::take(&mut fields),
                            });
                        }
                    } else if ch == ' ' || ch == '\t' {
                        // skip initial whitespace
                    } else if ch == self.quote {
                        if fields.is_empty() {
                            record_line = line;
                        }
                        state = ParseState::Quoted;
                    } else if ch == self.delimiter {
                        if fields.is_empty() {
                            record_line = line;
                        }
                        fields.push(std::mem::take(&mut field));
                    } else {
                        if fields.is_empty() {
                            record_line = line;
                        }
                        field.push(ch);
                        state = ParseState::Unquoted;
                    }
                }
                ParseState::Unquoted => {
                    if is_break {
                        fields.push(std::mem::take(&mut field));
                        records.push(RawRecord {
                            line: record_line,
                            fields: std::mem::take(&mut fields),
                        });
                        state = ParseState::StartField;
                    } else if ch == self.delimiter {
                        fields.push(std::mem::take(&mut field));
                        state = ParseState::StartField;
                    } else {
                        field.push(ch);
                    }
                }
                ParseState::Quoted => {
                    if ch == self.quote {
                        state = ParseState::QuoteInQuoted;
                    } else {
                        field.push(ch);
                    }
                }
                ParseState::QuoteInQuoted => {
                    if ch == self.quote {
                        field.push(ch);
                        state = ParseState::Quoted;
                    } else if ch == self.delimiter {
                        fields.push(std::mem::take(&mut field));
                        state = ParseState::StartField;
                    } else if is_break {
                        fields.push(std::mem::take(&mut field));
                        records.push(RawRecord {
                            line: record_line,
                            fields: std::mem::take(&mut fields),
                        });
                        state = ParseState::StartField;
                    } else {
                        field.push(ch);
                        state = ParseState::Unquoted;
                    }
                }
            }

            if ch == '\n' || ch == '\r' {
                line += 1;
            }
        }

        match state {
            ParseState::Quoted => {
                return Err(ReplayError::parse(
                    record_line,
                    "unexpected end of data inside a quoted field",
                ));
            }
            ParseState::Unquoted | ParseState::QuoteInQuoted => {
                fields.push(field);
                records.push(RawRecord {
                    line: record_line,
                    fields,
                });
            }
            ParseState::StartField => {
                if !fields.is_empty() {
                    fields.push(field);
                    records.push(RawRecord {
                        line: record_line,
                        fields,
                    });
                }
            }
        }

        Ok(records)
    }

    /// Decode a whole log into entries, in file order
    ///
    /// The first record is the header. Empty input yields no entries.
    pub fn decode(&self, text: &str) -> Result<Vec<LogEntry>> {
        let mut records = self.split_records(text)?.into_iter();

        let Some(header) = records.next() else {
            return Ok(Vec::new());
        };
        let layout = ColumnLayout::from_header(&header)?;

        records
            .map(|record| layout.entry_from(record))
            .collect()
    }
}

/// Positions of the required columns within a row
#[derive(Debug, Clone, Copy)]
struct ColumnLayout {
    width: usize,
    time_delta: usize,
    topic: usize,
    message: usize,
}

impl ColumnLayout {
    fn from_header(header: &RawRecord) -> Result<Self> {
        let position = |name: &str| {
            header
                .fields
                .iter()
                .position(|f| f.trim() == name)
                .ok_or_else(|| {
                    ReplayError::parse(header.line, format!("header is missing the '{}' column", name))
                })
        };

        Ok(Self {
            width: header.fields.len(),
            time_delta: position(COLUMNS[0])?,
            topic: position(COLUMNS[1])?,
            message: position(COLUMNS[2])?,
        })
    }

    fn entry_from(&self, record: RawRecord) -> Result<LogEntry> {
        if record.fields.len() != self.width {
            return Err(ReplayError::parse(
                record.line,
                format!("expected {} fields, got {}", self.width, record.fields.len()),
            ));
        }

        let raw_delta = record.fields[self.time_delta].trim();
        let time_delta: f64 = raw_delta.parse().map_err(|_| {
            ReplayError::parse(record.line, format!("time_delta '{}' is not a number", raw_delta))
        })?;
        if !time_delta.is_finite() || time_delta < 0.0 {
            return Err(ReplayError::parse(
                record.line,
                format!("time_delta '{}' must be a finite, non-negative number", raw_delta),
            ));
        }

        let mut fields = record.fields;
        let message = std::mem::take(&mut fields[self.message]);
        let topic = std::mem::take(&mut fields[self.topic]);

        Ok(LogEntry::new(time_delta, topic, message.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> LogCodec {
        LogCodec::new()
    }

    #[test]
    fn test_header_is_fully_quoted() {
        assert_eq!(codec().header(), "`time_delta`,`mqtt_topic`,`message`\r\n");
    }

    #[test]
    fn test_encode_quotes_every_field() {
        let row = codec().encode(&LogEntry::new(1.0, "a/b", "x")).unwrap();
        assert_eq!(row, "`1.0`,`a/b`,`x`\r\n");
    }

    #[test]
    fn test_encode_doubles_quote_chars() {
        let row = codec().encode(&LogEntry::new(0.5, "t", "say `hi`")).unwrap();
        assert_eq!(row, "`0.5`,`t`,`say ``hi```\r\n");
    }

    #[test]
    fn test_encode_rejects_binary_payload() {
        let err = codec()
            .encode(&LogEntry::new(0.0, "bin", vec![0xff, 0xfe]))
            .unwrap_err();
        assert!(matches!(err, ReplayError::Append(_)));
    }

    #[test]
    fn test_payload_with_delimiter_and_newline() {
        let c = codec();
        let entry = LogEntry::new(0.125, "dev/1", "a,b\nc\r\nd`e");
        let text = format!("{}{}", c.header(), c.encode(&entry).unwrap());

        let entries = c.decode(&text).unwrap();
        assert_eq!(entries, vec![entry]);
    }

    #[test]
    fn test_decode_accepts_unquoted_and_lf_rows() {
        let text = "time_delta,mqtt_topic,message\n0.5, a/b, hello\n\n1.5,c,`x,y`\n";
        let entries = codec().decode(text).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].topic, "a/b");
        assert_eq!(entries[0].message, b"hello");
        assert_eq!(entries[1].time_delta, 1.5);
        assert_eq!(entries[1].message, b"x,y");
    }

    #[test]
    fn test_decode_maps_columns_by_header_name() {
        let text = "`message`,`time_delta`,`mqtt_topic`\r\n`payload`,`2.0`,`t/1`\r\n";
        let entries = codec().decode(text).unwrap();
        assert_eq!(entries, vec![LogEntry::new(2.0, "t/1", "payload")]);
    }

    #[test]
    fn test_decode_empty_input() {
        assert!(codec().decode("").unwrap().is_empty());
        assert!(codec().decode(&codec().header()).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_column_count_reports_line() {
        let text = "`time_delta`,`mqtt_topic`,`message`\r\n`0.1`,`a`,`b`\r\n`0.2`,`a`\r\n";
        let err = codec().decode(text).unwrap_err();
        match err {
            ReplayError::Parse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("expected 3 fields, got 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_line_numbers_count_embedded_newlines() {
        let text = "`time_delta`,`mqtt_topic`,`message`\r\n`0.1`,`a`,`multi\nline`\r\n`soon`,`a`,`b`\r\n";
        let err = codec().decode(text).unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 4, .. }));
    }

    #[test]
    fn test_non_numeric_delta_is_parse_error() {
        let text = "`time_delta`,`mqtt_topic`,`message`\r\n`later`,`a`,`b`\r\n";
        assert!(matches!(
            codec().decode(text),
            Err(ReplayError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_negative_and_nan_delta_rejected() {
        for bad in ["-0.5", "NaN", "inf"] {
            let text = format!("time_delta,mqtt_topic,message\n{},a,b\n", bad);
            assert!(codec().decode(&text).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_missing_header_column() {
        let text = "time_delta,topic,message\n0.1,a,b\n";
        assert!(matches!(
            codec().decode(text),
            Err(ReplayError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_unterminated_quote() {
        let text = "`time_delta`,`mqtt_topic`,`message`\r\n`0.1`,`a`,`never closed\r\n";
        assert!(matches!(
            codec().decode(text),
            Err(ReplayError::Parse { line: 2, .. })
        ));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_any_text_payload_survives_quoting(
            topic in "[a-z/+#]{1,20}",
            message in "\\PC*",
            delta in 0.0f64..1.0e6,
        ) {
            let c = codec();
            let entry = LogEntry::new(delta, topic, message.into_bytes());
            let text = format!("{}{}", c.header(), c.encode(&entry).unwrap());

            let decoded = c.decode(&text).unwrap();
            prop_assert_eq!(decoded, vec![entry]);
        }

        #[test]
        fn test_embedded_breaks_and_quotes_survive(
            parts in prop::collection::vec("[a-z]{0,4}", 1..8),
            seps in prop::collection::vec(prop::sample::select(vec![",", "\n", "\r\n", "`", "``", "\r"]), 1..8),
        ) {
            let mut message = String::new();
            for (part, sep) in parts.iter().zip(seps.iter().cycle()) {
                message.push_str(part);
                message.push_str(sep);
            }
            let c = codec();
            let entry = LogEntry::new(0.5, "t", message.clone());
            let text = format!("{}{}", c.header(), c.encode(&entry).unwrap());

            let decoded = c.decode(&text).unwrap();
            prop_assert_eq!(decoded.len(), 1);
            prop_assert_eq!(&decoded[0].message, message.as_bytes());
        }
    }
}
