//! External publish requests
//!
//! Lines from an async reader are handed to the dispatch loop one at a time.

use async_channel::Receiver;
use contracts::substitute_client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A parsed publish request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub body: String,
}

/// Parse one input line
///
/// `"<topic> <body>"` publishes `body` to `topic`; a line without whitespace
/// publishes the whole line to `default_topic`. `{client}` is replaced with
/// `client_id` in either topic. Blank lines yield `None`.
pub fn parse_publish_request(
    line: &str,
    default_topic: &str,
    client_id: &str,
) -> Option<PublishRequest> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (topic, body) = match line.split_once(char::is_whitespace) {
        Some((topic, body)) => (topic, body.trim_start()),
        None => (default_topic, line),
    };

    if body.is_empty() {
        return None;
    }

    Some(PublishRequest {
        topic: substitute_client(topic, client_id),
        body: body.to_string(),
    })
}

/// Read `reader` line by line on a task, forwarding each line
///
/// The returned channel has capacity 1 and closes at EOF or on a read error.
pub fn spawn_line_reader<R>(reader: R) -> (Receiver<String>, JoinHandle<()>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = async_channel::bounded(1);

    let handle = tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        debug!("input consumer gone, stopping reader");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("input reached EOF");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "input read failed, closing input");
                    break;
                }
            }
        }
    });

    (rx, handle)
}
