//! Overdrive parameter parsing
//!
//! A parameter token looks like `name[:[ADAPTERS][:SUBINDEX]]=VALUE`, for example
//! `coreclk:1=900`, `vcore::0=0.81` or `fanspeed:all=default`.

use crate::adapters::{AdapterListError, AdapterSelector, parse_adapter_list};
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing a single parameter token
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamParseError {
    #[error("This is not a parameter: '{0}'")]
    NotAParameter(String),
    #[error("Wrong parameter name in '{0}'")]
    UnknownName(String),
    #[error("Can't parse adapter list for '{token}': {source}")]
    AdapterList {
        token: String,
        #[source]
        source: AdapterListError,
    },
    #[error("Can't parse sub-index in '{0}'")]
    BadSubIndex(String),
    #[error("Can't parse value in '{0}'")]
    BadValue(String),
    #[error("Unterminated parameter '{0}'")]
    Unterminated(String),
    #[error("Garbage in '{0}'")]
    Garbage(String),
}

impl ParamParseError {
    /// The token the error was reported for
    pub fn token(&self) -> &str {
        match self {
            ParamParseError::NotAParameter(t)
            | ParamParseError::UnknownName(t)
            | ParamParseError::BadSubIndex(t)
            | ParamParseError::BadValue(t)
            | ParamParseError::Unterminated(t)
            | ParamParseError::Garbage(t) => t,
            ParamParseError::AdapterList { token, .. } => token,
        }
    }
}

/// Hardware setting a parameter targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    CoreClock,
    MemoryClock,
    VddcVoltage,
    FanSpeed,
    PowerControl,
}

impl FieldKind {
    /// Fan speed and power control address a thermal controller instead of
    /// a performance level
    pub fn is_thermal(self) -> bool {
        matches!(self, FieldKind::FanSpeed | FieldKind::PowerControl)
    }

    /// Divisor between the driver's raw integer unit and the natural unit
    pub fn raw_scale(self) -> f64 {
        match self {
            FieldKind::CoreClock | FieldKind::MemoryClock => 100.0,
            FieldKind::VddcVoltage => 1000.0,
            FieldKind::FanSpeed | FieldKind::PowerControl => 1.0,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            FieldKind::CoreClock | FieldKind::MemoryClock => "MHz",
            FieldKind::VddcVoltage => "V",
            FieldKind::FanSpeed | FieldKind::PowerControl => "%",
        }
    }

    /// Convert a value in natural units to raw driver units, rounding half away from zero
    pub fn to_raw(self, value: f64) -> i32 {
        (value * self.raw_scale()).round() as i32
    }

    pub fn from_raw(self, raw: i32) -> f64 {
        raw as f64 / self.raw_scale()
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::CoreClock => "core clock",
            FieldKind::MemoryClock => "memory clock",
            FieldKind::VddcVoltage => "Vddc voltage",
            FieldKind::FanSpeed => "fanspeed",
            FieldKind::PowerControl => "powercontrol",
        };
        f.write_str(name)
    }
}

/// Performance level or thermal controller a parameter addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubIndex {
    /// Highest performance level of each adapter
    LastLevel,
    Index(i64),
}

impl SubIndex {
    /// Resolve against an adapter's level count, `None` when out of range
    pub fn resolve(self, level_count: usize) -> Option<usize> {
        match self {
            SubIndex::LastLevel => level_count.checked_sub(1),
            SubIndex::Index(i) => usize::try_from(i).ok().filter(|&i| i < level_count),
        }
    }
}

/// Requested value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Value(f64),
    /// Restore the hardware default
    Default,
}

impl ParamValue {
    pub fn is_default(self) -> bool {
        matches!(self, ParamValue::Default)
    }
}

/// One parsed command line parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRequest {
    pub field: FieldKind,
    pub adapters: AdapterSelector,
    pub sub_index: SubIndex,
    pub value: ParamValue,
    /// Original token, kept for diagnostics
    pub text: String,
}

impl std::str::FromStr for ParamRequest {
    type Err = ParamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_param(s)
    }
}

/// Field, default sub-index and whether a sub-index segment is accepted
fn lookup_name(name: &str) -> Option<(FieldKind, SubIndex, bool)> {
    let entry = match name {
        "coreclk" => (FieldKind::CoreClock, SubIndex::LastLevel, true),
        "memclk" => (FieldKind::MemoryClock, SubIndex::LastLevel, true),
        "vcore" => (FieldKind::VddcVoltage, SubIndex::LastLevel, true),
        "icoreclk" => (FieldKind::CoreClock, SubIndex::Index(0), false),
        "imemclk" => (FieldKind::MemoryClock, SubIndex::Index(0), false),
        "ivcore" => (FieldKind::VddcVoltage, SubIndex::Index(0), false),
        "fanspeed" => (FieldKind::FanSpeed, SubIndex::Index(0), true),
        "pwrctrl" | "powercontrol" => (FieldKind::PowerControl, SubIndex::Index(0), true),
        _ => return None,
    };
    Some(entry)
}

/// Parse one parameter token
pub fn parse_param(token: &str) -> Result<ParamRequest, ParamParseError> {
    let name_end = token
        .find(':')
        .or_else(|| token.find('='))
        .ok_or_else(|| ParamParseError::NotAParameter(token.to_string()))?;
    let (name, mut rest) = token.split_at(name_end);

    let (field, mut sub_index, sub_index_allowed) =
        lookup_name(name).ok_or_else(|| ParamParseError::UnknownName(token.to_string()))?;
    let mut adapters = AdapterSelector::default();

    if let Some(after_colon) = rest.strip_prefix(':') {
        let list_end = after_colon.find([':', '=']).unwrap_or(after_colon.len());
        let (list, after_list) = after_colon.split_at(list_end);
        if !list.is_empty() {
            adapters = parse_adapter_list(list).map_err(|source| ParamParseError::AdapterList {
                token: token.to_string(),
                source,
            })?;
        }
        rest = after_list;

        if sub_index_allowed {
            if let Some(after_colon) = rest.strip_prefix(':') {
                let (parsed, after_index) = take_integer(after_colon)
                    .map_err(|_| ParamParseError::BadSubIndex(token.to_string()))?;
                if let Some(index) = parsed {
                    sub_index = SubIndex::Index(index);
                }
                rest = after_index;
            }
        }
    }

    let value_text = rest
        .strip_prefix('=')
        .ok_or_else(|| ParamParseError::Unterminated(token.to_string()))?;

    let value = if value_text == "default" {
        ParamValue::Default
    } else {
        let len = decimal_prefix_len(value_text);
        if len == 0 {
            return Err(ParamParseError::BadValue(token.to_string()));
        }
        let (number, garbage) = value_text.split_at(len);
        if !garbage.is_empty() {
            return Err(ParamParseError::Garbage(token.to_string()));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| ParamParseError::BadValue(token.to_string()))?;
        if !value.is_finite() {
            return Err(ParamParseError::BadValue(token.to_string()));
        }
        ParamValue::Value(value)
    };

    Ok(ParamRequest {
        field,
        adapters,
        sub_index,
        value,
        text: token.to_string(),
    })
}

/// Parse every token, collecting all failures instead of stopping at the first
pub fn parse_params<I, S>(tokens: I) -> Result<Vec<ParamRequest>, Vec<ParamParseError>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut requests = Vec::new();
    let mut errors = Vec::new();
    for token in tokens {
        match parse_param(token.as_ref()) {
            Ok(request) => requests.push(request),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(requests)
    } else {
        Err(errors)
    }
}

/// Optional sign followed by digits; `Ok(None)` when no number is present
fn take_integer(input: &str) -> Result<(Option<i64>, &str), std::num::ParseIntError> {
    let sign = usize::from(input.starts_with(['+', '-']));
    let digits = input[sign..].bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Ok((None, input));
    }
    let (number, rest) = input.split_at(sign + digits);
    Ok((Some(number.parse()?), rest))
}

/// Length of the leading decimal number: `[+-]digits[.digits][(e|E)[+-]digits]`
fn decimal_prefix_len(input: &str) -> usize {
    let bytes = input.as_bytes();
    let mut pos = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        pos += 1;
    }
    let int_digits = count_digits(&bytes[pos..]);
    pos += int_digits;
    let mut frac_digits = 0;
    if bytes.get(pos) == Some(&b'.') {
        frac_digits = count_digits(&bytes[pos + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            pos += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return 0;
    }
    if matches!(bytes.get(pos), Some(b'e' | b'E')) {
        let mut exp = pos + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = count_digits(&bytes[exp..]);
        if exp_digits > 0 {
            pos = exp + exp_digits;
        }
    }
    pos
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
