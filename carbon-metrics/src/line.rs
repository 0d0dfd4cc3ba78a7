use std::iter::FusedIterator;

use carbon_common::UnixTimestamp;

/// The reason a line could not be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseLineError {
    /// The line does not have the shape `name value [timestamp]`.
    #[error("malformed line")]
    MalformedLine,
    /// The value is not a finite decimal number.
    #[error("invalid metric value")]
    InvalidValue,
    /// The timestamp is not a non-negative integer.
    #[error("invalid timestamp")]
    InvalidTimestamp,
    /// The raw line is not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

impl ParseLineError {
    /// Returns a short identifier used to tag internal metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedLine => "malformed_line",
            Self::InvalidValue => "invalid_value",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::InvalidUtf8 => "invalid_utf8",
        }
    }
}

/// A single line of the Graphite plaintext protocol, split into its components.
///
/// The protocol has the form:
///
/// ```text
/// <metric-name>[;<key>=<value>]* <value> [<unix-timestamp>]
/// ```
///
/// Fields are separated by single spaces. Tags are attached to the name without spaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParsedLine<'a> {
    /// The metric name without the tag segment, used as lookup key for mappings.
    pub name: &'a str,
    /// The raw tag segment following the first `;` of the name, if present.
    pub tags: Option<&'a str>,
    /// The numeric value, always finite.
    pub value: f64,
    /// The timestamp of the line, if present.
    pub timestamp: Option<UnixTimestamp>,
}

impl<'a> ParsedLine<'a> {
    /// Parses a single line.
    ///
    /// Trailing line terminators are stripped. No other whitespace is trimmed, so a trailing
    /// separator without a timestamp is rejected as malformed.
    ///
    /// # Example
    ///
    /// ```
    /// use carbon_metrics::ParsedLine;
    ///
    /// let line = ParsedLine::parse("foo.bar;env=prod 42 1534620625\n").unwrap();
    /// assert_eq!(line.name, "foo.bar");
    /// assert_eq!(line.tags, Some("env=prod"));
    /// assert_eq!(line.value, 42.0);
    /// ```
    pub fn parse(line: &'a str) -> Result<Self, ParseLineError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields = line.split(' ');

        let name_token = non_empty(fields.next()).ok_or(ParseLineError::MalformedLine)?;
        let value_token = non_empty(fields.next()).ok_or(ParseLineError::MalformedLine)?;
        let timestamp_token = fields.next();

        if fields.next().is_some() {
            return Err(ParseLineError::MalformedLine);
        }

        let (name, tags) = match name_token.split_once(';') {
            Some((name, tags)) => (name, Some(tags)),
            None => (name_token, None),
        };

        if name.is_empty() {
            return Err(ParseLineError::MalformedLine);
        }

        let value = parse_value(value_token).ok_or(ParseLineError::InvalidValue)?;

        let timestamp = match timestamp_token {
            None => None,
            Some("") => return Err(ParseLineError::MalformedLine),
            Some(token) => Some(
                token
                    .parse::<UnixTimestamp>()
                    .map_err(|_| ParseLineError::InvalidTimestamp)?,
            ),
        };

        Ok(Self {
            name,
            tags,
            value,
            timestamp,
        })
    }
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.filter(|s| !s.is_empty())
}

/// Parses a finite floating point value.
fn parse_value(string: &str) -> Option<f64> {
    string.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Splits a payload into its lines.
///
/// Both UNIX newlines (`\n`) and Windows newlines (`\r\n`) are supported. Empty lines are skipped.
///
/// ```
/// let lines: Vec<_> = carbon_metrics::lines("a 1\r\n\nb 2").collect();
/// assert_eq!(lines, ["a 1", "b 2"]);
/// ```
pub fn lines(payload: &str) -> Lines<'_> {
    Lines { payload }
}

/// Iterator over the non-empty lines of a payload, returned from [`lines`].
#[derive(Clone, Debug, Default)]
pub struct Lines<'a> {
    payload: &'a str,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.payload.is_empty() {
                return None;
            }

            let (current, rest) = self
                .payload
                .split_once('\n')
                .unwrap_or((self.payload, ""));
            self.payload = rest;

            let current = current.strip_suffix('\r').unwrap_or(current);
            if !current.is_empty() {
                return Some(current);
            }
        }
    }
}

impl FusedIterator for Lines<'_> {}
