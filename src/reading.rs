use std::fmt;

use thiserror::Error;

/// Character offset at which the numeric value starts: `<action><reserved:2><value>`.
pub const VALUE_OFFSET: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Status,
    Humidity,
    Temperature,
    Door,
    Other(char),
}

impl From<char> for ActionType {
    fn from(c: char) -> Self {
        match c {
            'S' => ActionType::Status,
            'H' => ActionType::Humidity,
            'T' => ActionType::Temperature,
            'D' => ActionType::Door,
            other => ActionType::Other(other),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            ActionType::Status => 'S',
            ActionType::Humidity => 'H',
            ActionType::Temperature => 'T',
            ActionType::Door => 'D',
            ActionType::Other(c) => *c,
        };
        write!(f, "{c}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedReading {
    pub action: ActionType,
    pub value: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed line {0:?}: expected at least {min} characters", min = VALUE_OFFSET + 1)]
    MalformedLine(String),
    #[error("invalid value in line {0:?}")]
    InvalidValue(String),
}

/// Decodes one line of the serial protocol, e.g. `T__25`.
pub fn decode_line(line: &str) -> Result<DecodedReading, DecodeError> {
    let mut chars = line.char_indices();
    let action = match chars.next() {
        Some((_, c)) => ActionType::from(c),
        None => return Err(DecodeError::MalformedLine(line.to_string())),
    };

    let value_start = match line.char_indices().nth(VALUE_OFFSET) {
        Some((idx, _)) => idx,
        None => return Err(DecodeError::MalformedLine(line.to_string())),
    };

    let value = parse_leading_int(&line[value_start..])
        .ok_or_else(|| DecodeError::InvalidValue(line.to_string()))?;

    Ok(DecodedReading { action, value })
}

/// Parses the leading integer of `s`, ignoring anything after the digits.
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let sign_len = match s.as_bytes().first() {
        Some(b'-' | b'+') => 1,
        _ => 0,
    };

    let end = s[sign_len..]
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(s.len() - sign_len);
    if end == 0 {
        return None;
    }

    s[..sign_len + end].parse().ok()
}
