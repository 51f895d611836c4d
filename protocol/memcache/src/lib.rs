//! Memcache ASCII protocol support for the mc-guardian eavesdropper.
//!
//! The server side of this crate classifies command lines and parses store
//! headers; it never materializes values. Replies are the fixed stubs an
//! eavesdropper answers with. The client side ([`request`], [`response`])
//! encodes outbound commands and decodes the responses the reporter and
//! aggregator care about.

pub mod request;
pub mod response;

use thiserror::Error;

/// Line terminator for the ASCII protocol.
pub const CRLF: &[u8] = b"\r\n";

/// Reply to the fetch family and to STATS.
pub const END: &[u8] = b"END\r\n";
/// Reply to the store family.
pub const NOT_STORED: &[u8] = b"NOT_STORED\r\n";
/// Reply to DELETE and the other mutation commands.
pub const NOT_FOUND: &[u8] = b"NOT_FOUND\r\n";
/// Reply to VERSION.
pub const VERSION_REPLY: &[u8] = b"mc_guardian 0.1\r\n";
/// Reply to anything the eavesdropper does not recognize.
pub const CLIENT_ERROR: &[u8] = b"CLIENT_ERROR <ignore eavesdropping error>\r\n";

/// Error from command or response parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A store header was missing arguments or carried non-numeric fields.
    #[error("malformed store header")]
    StoreHeader,
    /// A response line did not match the expected shape.
    #[error("malformed response line: {0}")]
    ResponseLine(String),
}

/// Commands the eavesdropper classifies.
///
/// Everything else on the wire maps to [`Command::Unknown`] and is answered
/// with [`CLIENT_ERROR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Get,
    Gets,
    Gat,
    Gats,
    Set,
    Add,
    Replace,
    Cas,
    Append,
    Prepend,
    Incr,
    Decr,
    Touch,
    Delete,
    Stats,
    Version,
    Quit,
    Unknown,
}

impl Command {
    /// Commands that read keys (GET, GETS, GAT, GATS).
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            Command::Get | Command::Gets | Command::Gat | Command::Gats
        )
    }

    /// Commands followed by an inline value payload (SET, ADD, REPLACE, CAS).
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            Command::Set | Command::Add | Command::Replace | Command::Cas
        )
    }
}

/// Classify a command line and split out its positional arguments.
///
/// The line must already be stripped of its CRLF. For GAT/GATS the leading
/// exptime argument is skipped so the returned arguments are the keys.
pub fn parse_command(line: &str) -> (Command, Vec<&str>) {
    let mut sections = line.split(' ');
    let Some(verb) = sections.next() else {
        return (Command::Unknown, Vec::new());
    };

    let command = match verb {
        "get" => Command::Get,
        "gets" => Command::Gets,
        "gat" => Command::Gat,
        "gats" => Command::Gats,
        "set" => Command::Set,
        "add" => Command::Add,
        "replace" => Command::Replace,
        "cas" => Command::Cas,
        "append" => Command::Append,
        "prepend" => Command::Prepend,
        "incr" => Command::Incr,
        "decr" => Command::Decr,
        "touch" => Command::Touch,
        "delete" => Command::Delete,
        "stats" => Command::Stats,
        "version" => Command::Version,
        "quit" => Command::Quit,
        _ => return (Command::Unknown, Vec::new()),
    };

    // gat/gats carry an exptime before the keys
    if matches!(command, Command::Gat | Command::Gats) {
        sections.next();
    }

    (command, sections.collect())
}

/// Parsed header of a store command (`<key> <flags> <exptime> <bytes>`).
///
/// `exptime` is returned exactly as sent; relative-to-absolute rewriting
/// happens where the value is recorded, not in the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader<'a> {
    pub key: &'a str,
    pub bytes: usize,
    pub exptime: i64,
}

/// Parse the argument list of a store command.
///
/// Requires at least `key flags exptime bytes`; extra arguments (the CAS
/// unique, `noreply`) are ignored.
pub fn parse_store<'a>(args: &[&'a str]) -> Result<StoreHeader<'a>, ParseError> {
    if args.len() < 4 {
        return Err(ParseError::StoreHeader);
    }
    let bytes: usize = args[3]
        .trim()
        .parse()
        .map_err(|_| ParseError::StoreHeader)?;
    let exptime: i64 = args[2].parse().map_err(|_| ParseError::StoreHeader)?;
    Ok(StoreHeader {
        key: args[0],
        bytes,
        exptime,
    })
}
