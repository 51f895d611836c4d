//! Client-side request encoding for the Memcache ASCII protocol.
//!
//! Only the commands the reporter and aggregator speak upstream: SET,
//! multi-key GET, and VERSION (used by the router identity probe).

/// A request builder for encoding Memcache commands.
#[derive(Debug, Clone)]
pub enum Request<'a> {
    /// Multi-GET command: `get <key1> <key2> ...\r\n`
    Get { keys: &'a [&'a str] },
    /// SET command: `set <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
    Set {
        key: &'a str,
        value: &'a [u8],
        flags: u32,
        exptime: u32,
    },
    /// VERSION command: `version\r\n`
    Version,
    /// QUIT command: `quit\r\n`
    Quit,
}

impl<'a> Request<'a> {
    /// Create a GET request for one or more keys.
    #[inline]
    pub fn get(keys: &'a [&'a str]) -> Self {
        Request::Get { keys }
    }

    /// Create a SET request with zero flags and no expiry.
    #[inline]
    pub fn set(key: &'a str, value: &'a [u8]) -> Self {
        Request::Set {
            key,
            value,
            flags: 0,
            exptime: 0,
        }
    }

    /// Create a VERSION request.
    #[inline]
    pub fn version() -> Self {
        Request::Version
    }

    /// Create a QUIT request.
    #[inline]
    pub fn quit() -> Self {
        Request::Quit
    }

    /// Encode this request into a buffer.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Request::Get { keys } => encode_get(buf, keys),
            Request::Set {
                key,
                value,
                flags,
                exptime,
            } => encode_set(buf, key, value, *flags, *exptime),
            Request::Version => encode_simple(buf, b"version"),
            Request::Quit => encode_simple(buf, b"quit"),
        }
    }
}

/// Encode a multi-GET command: `get <key1> <key2> ...\r\n`
fn encode_get(buf: &mut Vec<u8>, keys: &[&str]) {
    if keys.is_empty() {
        return;
    }
    buf.extend_from_slice(b"get");
    for key in keys {
        buf.push(b' ');
        buf.extend_from_slice(key.as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
}

/// Encode a SET command: `set <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
fn encode_set(buf: &mut Vec<u8>, key: &str, value: &[u8], flags: u32, exptime: u32) {
    buf.extend_from_slice(b"set ");
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(format!(" {} {} {}\r\n", flags, exptime, value.len()).as_bytes());
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
}

/// Encode a command with no arguments.
fn encode_simple(buf: &mut Vec<u8>, cmd: &[u8]) {
    buf.extend_from_slice(cmd);
    buf.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(request: Request<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        request.encode(&mut buf);
        buf
    }

    #[test]
    fn test_encode_get_single() {
        assert_eq!(encoded(Request::get(&["mykey"])), b"get mykey\r\n");
    }

    #[test]
    fn test_encode_get_multi() {
        assert_eq!(
            encoded(Request::get(&["key1", "key2", "key3"])),
            b"get key1 key2 key3\r\n"
        );
    }

    #[test]
    fn test_encode_get_empty() {
        assert!(encoded(Request::get(&[])).is_empty());
    }

    #[test]
    fn test_encode_set() {
        assert_eq!(
            encoded(Request::set("mykey", b"myvalue")),
            b"set mykey 0 0 7\r\nmyvalue\r\n"
        );
    }

    #[test]
    fn test_encode_set_with_options() {
        let request = Request::Set {
            key: "mykey",
            value: b"myvalue",
            flags: 123,
            exptime: 3600,
        };
        assert_eq!(encoded(request), b"set mykey 123 3600 7\r\nmyvalue\r\n");
    }

    #[test]
    fn test_encode_version() {
        assert_eq!(encoded(Request::version()), b"version\r\n");
    }

    #[test]
    fn test_encode_quit() {
        assert_eq!(encoded(Request::quit()), b"quit\r\n");
    }
}
