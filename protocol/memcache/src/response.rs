//! Client-side response parsing for the Memcache ASCII protocol.
//!
//! Responses arrive line-framed; value payloads follow their `VALUE` header
//! line. The client reads lines itself and uses these helpers to interpret
//! them.

use crate::ParseError;

/// Header of a returned value: `VALUE <key> <flags> <bytes> [<cas>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueHeader {
    pub key: String,
    pub flags: u32,
    pub bytes: usize,
    pub cas: Option<u64>,
}

/// Status line of a GET/SET exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    /// `VALUE ...` header; `bytes` of payload plus CRLF follow.
    Value(ValueHeader),
    /// `END` terminating a GET response.
    End,
    /// `STORED` acknowledging a SET.
    Stored,
    NotStored,
    NotFound,
    Deleted,
    /// `ERROR`, `CLIENT_ERROR ...`, or `SERVER_ERROR ...`.
    Error(String),
}

impl ResponseLine {
    /// Interpret one response line (CRLF already stripped).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        match line {
            "END" => return Ok(ResponseLine::End),
            "STORED" => return Ok(ResponseLine::Stored),
            "NOT_STORED" => return Ok(ResponseLine::NotStored),
            "NOT_FOUND" => return Ok(ResponseLine::NotFound),
            "DELETED" => return Ok(ResponseLine::Deleted),
            _ => {}
        }
        if line == "ERROR" || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR")
        {
            return Ok(ResponseLine::Error(line.to_string()));
        }
        if let Some(rest) = line.strip_prefix("VALUE ") {
            return parse_value_header(rest).map(ResponseLine::Value);
        }
        Err(ParseError::ResponseLine(line.to_string()))
    }
}

fn parse_value_header(rest: &str) -> Result<ValueHeader, ParseError> {
    let malformed = || ParseError::ResponseLine(format!("VALUE {rest}"));
    let mut fields = rest.split(' ');
    let key = fields.next().filter(|k| !k.is_empty()).ok_or_else(malformed)?;
    let flags: u32 = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(malformed)?;
    let bytes: usize = fields
        .next()
        .and_then(|b| b.parse().ok())
        .ok_or_else(malformed)?;
    let cas = match fields.next() {
        Some(c) => Some(c.parse().map_err(|_| malformed())?),
        None => None,
    };
    Ok(ValueHeader {
        key: key.to_string(),
        flags,
        bytes,
        cas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_lines() {
        assert_eq!(ResponseLine::parse("END").unwrap(), ResponseLine::End);
        assert_eq!(ResponseLine::parse("STORED").unwrap(), ResponseLine::Stored);
        assert_eq!(
            ResponseLine::parse("NOT_STORED").unwrap(),
            ResponseLine::NotStored
        );
        assert_eq!(
            ResponseLine::parse("NOT_FOUND").unwrap(),
            ResponseLine::NotFound
        );
        assert_eq!(
            ResponseLine::parse("DELETED").unwrap(),
            ResponseLine::Deleted
        );
    }

    #[test]
    fn parses_value_header() {
        let parsed = ResponseLine::parse("VALUE some_key 0 1024").unwrap();
        assert_eq!(
            parsed,
            ResponseLine::Value(ValueHeader {
                key: "some_key".to_string(),
                flags: 0,
                bytes: 1024,
                cas: None,
            })
        );
    }

    #[test]
    fn parses_value_header_with_cas() {
        let parsed = ResponseLine::parse("VALUE k 12 3 99").unwrap();
        assert_eq!(
            parsed,
            ResponseLine::Value(ValueHeader {
                key: "k".to_string(),
                flags: 12,
                bytes: 3,
                cas: Some(99),
            })
        );
    }

    #[test]
    fn parses_error_lines() {
        assert!(matches!(
            ResponseLine::parse("ERROR").unwrap(),
            ResponseLine::Error(_)
        ));
        assert!(matches!(
            ResponseLine::parse("SERVER_ERROR out of memory").unwrap(),
            ResponseLine::Error(_)
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(ResponseLine::parse("VALUE").is_err());
        assert!(ResponseLine::parse("VALUE k x 3").is_err());
        assert!(ResponseLine::parse("WHATEVER").is_err());
    }
}
