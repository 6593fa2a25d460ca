//! Reply batching against log durability.

use crate::connection::{Outbound, OutboundSender};
use sequora_core::{CoreResult, LogCompletion, LogRecord};
use sequora_protocol::SequencerResponse;

/// A reply waiting for its decision record to become durable.
#[derive(Debug)]
pub struct PendingReply {
    sink: OutboundSender,
    response: SequencerResponse,
}

/// Accumulates encoded decision records and the replies that depend on
/// them until the batch is submitted for durable append.
///
/// The encode buffer is the sequencer's shared WAL staging area: every
/// record a request produces is appended here under the state lock, and
/// the batch is cut either when the buffer reaches the size threshold or
/// when the flush timer fires. Replies are kept in arrival order; the
/// log writer releases them FIFO once the batch is durable.
#[derive(Debug)]
pub struct CommitBatcher {
    buf: Vec<u8>,
    replies: Vec<PendingReply>,
    threshold: usize,
}

impl CommitBatcher {
    /// Creates a batcher that cuts a batch at `threshold` encoded bytes.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            buf: Vec::with_capacity(threshold),
            replies: Vec::new(),
            threshold,
        }
    }

    /// Appends one record to the current batch.
    pub fn encode(&mut self, record: &LogRecord) {
        record.encode_into(&mut self.buf);
    }

    /// Queues a reply to be released when the current batch is durable.
    pub fn push_reply(&mut self, sink: OutboundSender, response: SequencerResponse) {
        self.replies.push(PendingReply { sink, response });
    }

    /// Returns true once the encode buffer reached the size threshold.
    #[must_use]
    pub fn should_flush(&self) -> bool {
        self.buf.len() >= self.threshold
    }

    /// Returns true if there is nothing to flush.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.replies.is_empty()
    }

    /// Cuts the current batch, leaving the batcher empty.
    pub fn take(&mut self) -> (Vec<u8>, ReplyBatch) {
        let bytes = std::mem::replace(&mut self.buf, Vec::with_capacity(self.threshold));
        let replies = std::mem::take(&mut self.replies);
        (bytes, ReplyBatch { replies })
    }
}

/// The replies of one cut batch, released by the log writer.
#[derive(Debug)]
pub struct ReplyBatch {
    replies: Vec<PendingReply>,
}

impl ReplyBatch {
    /// Number of pending replies in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    /// Returns true if the batch carries no replies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}

impl LogCompletion for ReplyBatch {
    fn complete(self, result: CoreResult<u64>) {
        match result {
            Ok(_) => {
                // FIFO: replies leave in the order requests were accepted
                for reply in self.replies {
                    let _ = reply.sink.send(Outbound::Response(reply.response));
                }
            }
            Err(err) => {
                // Never acknowledge a decision the log refused. Each
                // affected connection gets an explicit failure instead.
                tracing::error!(
                    error = %err,
                    replies = self.replies.len(),
                    "batch append failed; failing pending replies"
                );
                let message = err.to_string();
                for reply in self.replies {
                    let _ = reply.sink.send(Outbound::Failure(message.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequora_core::{CoreError, Timestamp};
    use sequora_protocol::CommitResponse;
    use std::sync::mpsc::channel;

    fn response(start: u64) -> SequencerResponse {
        SequencerResponse::Commit(CommitResponse::committed(start, start + 1))
    }

    #[test]
    fn threshold_triggers_flush() {
        let mut batcher = CommitBatcher::new(32);
        assert!(!batcher.should_flush());

        // Commit records are 17 bytes; two cross the threshold
        for i in 0..2 {
            batcher.encode(&LogRecord::Commit {
                start: Timestamp::new(i),
                commit: Timestamp::new(i + 1),
            });
        }
        assert!(batcher.should_flush());
    }

    #[test]
    fn take_leaves_batcher_empty() {
        let mut batcher = CommitBatcher::new(32);
        let (tx, _rx) = channel();
        batcher.encode(&LogRecord::Abort {
            start: Timestamp::new(5),
        });
        batcher.push_reply(tx, response(5));

        let (bytes, batch) = batcher.take();
        assert!(!bytes.is_empty());
        assert_eq!(batch.len(), 1);
        assert!(batcher.is_empty());
    }

    #[test]
    fn successful_batch_releases_replies_in_order() {
        let mut batcher = CommitBatcher::new(1024);
        let (tx, rx) = channel();
        for i in 0..3 {
            batcher.push_reply(tx.clone(), response(i));
        }

        let (_bytes, batch) = batcher.take();
        batch.complete(Ok(0));

        for i in 0..3 {
            match rx.recv().unwrap() {
                Outbound::Response(SequencerResponse::Commit(reply)) => {
                    assert_eq!(reply.start_timestamp, i);
                }
                other => panic!("unexpected outbound: {other:?}"),
            }
        }
    }

    #[test]
    fn failed_batch_fails_every_reply() {
        let mut batcher = CommitBatcher::new(1024);
        let (tx, rx) = channel();
        batcher.push_reply(tx.clone(), response(1));
        batcher.push_reply(tx, response(2));

        let (_bytes, batch) = batcher.take();
        batch.complete(Err(CoreError::durability("disk gone")));

        for _ in 0..2 {
            assert!(matches!(rx.recv().unwrap(), Outbound::Failure(_)));
        }
    }

    #[test]
    fn replies_without_records_still_batch() {
        let mut batcher = CommitBatcher::new(1024);
        let (tx, _rx) = channel();
        batcher.push_reply(tx, response(1));
        assert!(!batcher.is_empty());

        let (bytes, batch) = batcher.take();
        assert!(bytes.is_empty());
        assert_eq!(batch.len(), 1);
    }
}
