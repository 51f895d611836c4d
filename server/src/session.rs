//! Eavesdropping protocol sessions.
//!
//! Each inbound connection runs one session: read a command line, apply its
//! side effect to the engine, answer with the fixed stub, repeat. Store
//! payloads are consumed and discarded byte-exactly so the stream never
//! desyncs. A parse failure, write failure, or EOF ends the session without
//! touching any other session or engine state.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use hotkey_engine::{KeyScorer, RollingWindows};
use protocol_memcache::{
    CLIENT_ERROR, Command, END, NOT_FOUND, NOT_STORED, VERSION_REPLY, parse_command, parse_store,
};

use crate::metrics::{DELETES, FETCHES, PROTOCOL_ERRORS, STORES};

/// The engine hooks a protocol session drives.
pub struct Eavesdropper {
    windows: Arc<RollingWindows>,
    scorer: Arc<dyn KeyScorer>,
}

impl Eavesdropper {
    pub fn new(windows: Arc<RollingWindows>, scorer: Arc<dyn KeyScorer>) -> Self {
        Self { windows, scorer }
    }

    /// Count each fetched key against the writable window.
    fn on_fetch(&self, keys: &[&str]) {
        FETCHES.increment();
        for key in keys {
            self.windows.increment(key, 1);
        }
    }

    /// Record the stored value's byte length as the key's score.
    fn on_store(&self, key: &str, bytes: u64, exptime: i64) {
        STORES.increment();
        self.scorer.set_score(key, bytes, exptime);
    }

    /// Forget the deleted key's score.
    fn on_delete(&self, key: &str) {
        DELETES.increment();
        self.scorer.del_scores(&[key]);
    }
}

/// Serve one connection until QUIT, EOF, or an error.
pub async fn serve<S>(stream: S, eavesdropper: Arc<Eavesdropper>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = stream.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(()); // EOF
        }
        while line.last().is_some_and(|byte| matches!(byte, b'\r' | b'\n')) {
            line.pop();
        }

        let Ok(text) = std::str::from_utf8(&line) else {
            // Not a text-protocol line; answer like any unknown command.
            PROTOCOL_ERRORS.increment();
            stream.get_mut().write_all(CLIENT_ERROR).await?;
            continue;
        };

        let (command, args) = parse_command(text);
        let reply: &[u8] = match command {
            Command::Get | Command::Gets | Command::Gat | Command::Gats => {
                eavesdropper.on_fetch(&args);
                END
            }
            Command::Set | Command::Add | Command::Replace | Command::Cas => {
                let header = parse_store(&args).map_err(|error| {
                    PROTOCOL_ERRORS.increment();
                    debug!(%error, "malformed store header");
                    io::Error::new(io::ErrorKind::InvalidData, error)
                })?;
                eavesdropper.on_store(header.key, header.bytes as u64, header.exptime);
                skip_payload(&mut stream, header.bytes).await?;
                NOT_STORED
            }
            Command::Delete => {
                if let Some(key) = args.first() {
                    eavesdropper.on_delete(key);
                }
                NOT_FOUND
            }
            Command::Append
            | Command::Prepend
            | Command::Incr
            | Command::Decr
            | Command::Touch => NOT_FOUND,
            Command::Version => VERSION_REPLY,
            Command::Stats => END,
            Command::Quit => return Ok(()),
            Command::Unknown => {
                PROTOCOL_ERRORS.increment();
                CLIENT_ERROR
            }
        };

        stream.get_mut().write_all(reply).await?;
    }
}

/// Consume exactly `bytes + 2` bytes (payload plus CRLF) from the stream.
async fn skip_payload<R>(stream: &mut R, bytes: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    // The byte count is peer-controlled; a value near usize::MAX parses but
    // must not overflow the skip length.
    let expected = (bytes as u64).saturating_add(2);
    let skipped = tokio::io::copy(&mut stream.take(expected), &mut tokio::io::sink()).await?;
    if skipped < expected {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotkey_engine::{ShardedCounter, ShardedScorer};

    fn engine() -> (Arc<RollingWindows>, Arc<ShardedScorer>, Arc<Eavesdropper>) {
        let scorer = Arc::new(ShardedScorer::new(2, 96));
        let windows = Arc::new(RollingWindows::new(
            scorer.clone() as Arc<dyn KeyScorer>,
            || Arc::new(ShardedCounter::new(2)),
            4,
            10,
            0,
        ));
        let eavesdropper = Arc::new(Eavesdropper::new(
            windows.clone(),
            scorer.clone() as Arc<dyn KeyScorer>,
        ));
        (windows, scorer, eavesdropper)
    }

    /// Drive a session over an in-memory stream and collect its replies.
    async fn exchange(eavesdropper: Arc<Eavesdropper>, input: &[u8]) -> Vec<u8> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let session = tokio::spawn(serve(server, eavesdropper));

        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap(); // EOF ends the session

        let mut replies = Vec::new();
        client.read_to_end(&mut replies).await.unwrap();
        session.await.unwrap().ok();
        replies
    }

    #[tokio::test]
    async fn fetches_are_counted_and_answered_with_end() {
        let (windows, _, eavesdropper) = engine();
        let replies = exchange(
            eavesdropper,
            b"get some_key\r\nget some_key another_key\r\n",
        )
        .await;
        assert_eq!(replies, b"END\r\nEND\r\n");

        let tops = windows.roll();
        assert_eq!(tops["some_key"], 2 * 96);
        assert_eq!(tops["another_key"], 96);
    }

    #[tokio::test]
    async fn gat_counts_keys_after_the_exptime() {
        let (windows, _, eavesdropper) = engine();
        let replies = exchange(eavesdropper, b"gat 300 some_key\r\n").await;
        assert_eq!(replies, b"END\r\n");

        let tops = windows.roll();
        assert!(tops.contains_key("some_key"));
        assert!(!tops.contains_key("300"));
    }

    #[tokio::test]
    async fn stores_record_scores_and_skip_payloads() {
        let (_, scorer, eavesdropper) = engine();
        let replies = exchange(
            eavesdropper,
            b"set some_key 0 0 5\r\nhello\r\nget some_key\r\n",
        )
        .await;
        // Payload consumed exactly; the following command still parses.
        assert_eq!(replies, b"NOT_STORED\r\nEND\r\n");
        assert_eq!(scorer.get_score("some_key"), 5);
    }

    #[tokio::test]
    async fn deletes_forget_scores() {
        let (_, scorer, eavesdropper) = engine();
        let replies = exchange(
            eavesdropper,
            b"set some_key 0 0 5\r\nhello\r\ndelete some_key\r\n",
        )
        .await;
        assert_eq!(replies, b"NOT_STORED\r\nNOT_FOUND\r\n");
        assert_eq!(scorer.get_score("some_key"), 96);
    }

    #[tokio::test]
    async fn stub_replies() {
        let (_, _, eavesdropper) = engine();
        let replies = exchange(
            eavesdropper,
            b"version\r\nstats\r\nincr some_key 1\r\ntouch some_key 3\r\nbogus\r\n",
        )
        .await;
        assert_eq!(
            replies,
            &b"mc_guardian 0.1\r\nEND\r\nNOT_FOUND\r\nNOT_FOUND\r\n\
CLIENT_ERROR <ignore eavesdropping error>\r\n"[..]
        );
    }

    #[tokio::test]
    async fn quit_ends_the_session_silently() {
        let (_, _, eavesdropper) = engine();
        let replies = exchange(eavesdropper, b"quit\r\nget some_key\r\n").await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn malformed_store_header_ends_the_session() {
        let (_, _, eavesdropper) = engine();
        let (mut client, server) = tokio::io::duplex(4096);
        let session = tokio::spawn(serve(server, eavesdropper));

        client.write_all(b"set some_key 0 zero\r\n").await.unwrap();

        let outcome = session.await.unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let (_, _, eavesdropper) = engine();
        let (mut client, server) = tokio::io::duplex(4096);
        let session = tokio::spawn(serve(server, eavesdropper));

        client
            .write_all(b"set some_key 0 0 100\r\nshort\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let outcome = session.await.unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn absurd_store_byte_count_ends_the_session() {
        let (_, _, eavesdropper) = engine();
        let (mut client, server) = tokio::io::duplex(4096);
        let session = tokio::spawn(serve(server, eavesdropper));

        // usize::MAX parses as a byte count; the skip must neither overflow
        // nor leave the trailing commands interpreted as payload.
        client
            .write_all(b"set some_key 0 0 18446744073709551615\r\nhello\r\nget some_key\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let outcome = session.await.unwrap();
        assert!(outcome.is_err());

        let mut replies = Vec::new();
        client.read_to_end(&mut replies).await.unwrap();
        assert!(replies.is_empty(), "no reply should precede the session error");
    }
}
