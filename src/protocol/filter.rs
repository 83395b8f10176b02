//! Filtering decorator that drops unsolicited peer gossip
//!
//! Nodes push `EXCHANGE_PUBLIC_PEERS` frames at any time, including in the
//! middle of an answer. The filter wraps any [`FrameSource`] and hands on
//! only the frames a consumer asked for.

use async_trait::async_trait;
use tracing::trace;

use super::{Frame, FrameSource, EXCHANGE_PUBLIC_PEERS};
use crate::error::{OracleError, Result};

pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

pub struct GossipFilter<S> {
    inner: S,
    max_attempts: usize,
    skipped_total: u64,
}

impl<S: FrameSource> GossipFilter<S> {
    pub fn new(inner: S, max_attempts: usize) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            skipped_total: 0,
        }
    }

    /// Gossip frames discarded over the lifetime of this reader
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }
}

#[async_trait]
impl<S: FrameSource> FrameSource for GossipFilter<S> {
    async fn next_frame(&mut self) -> Result<Frame> {
        for _ in 0..self.max_attempts {
            let frame = self.inner.next_frame().await?;
            if frame.msg_type != EXCHANGE_PUBLIC_PEERS {
                return Ok(frame);
            }
            self.skipped_total += 1;
            trace!(nonce = frame.nonce, "skipping peer gossip frame");
        }
        Err(OracleError::ProtocolDesync(self.max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{END_RESPONSE, RESPOND_ORACLE_DATA};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Frame>);

    #[async_trait]
    impl FrameSource for Scripted {
        async fn next_frame(&mut self) -> Result<Frame> {
            self.0
                .pop_front()
                .ok_or(OracleError::FrameTimeout(std::time::Duration::ZERO))
        }
    }

    fn frame(msg_type: u8) -> Frame {
        Frame {
            size: 8,
            msg_type,
            nonce: 0,
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn gossip_interleaved_with_answer_is_dropped() {
        let mut filter = GossipFilter::new(
            Scripted(VecDeque::from(vec![
                frame(EXCHANGE_PUBLIC_PEERS),
                frame(RESPOND_ORACLE_DATA),
                frame(EXCHANGE_PUBLIC_PEERS),
                frame(EXCHANGE_PUBLIC_PEERS),
                frame(END_RESPONSE),
            ])),
            DEFAULT_MAX_ATTEMPTS,
        );

        assert_eq!(
            filter.next_frame().await.unwrap().msg_type,
            RESPOND_ORACLE_DATA
        );
        assert_eq!(filter.next_frame().await.unwrap().msg_type, END_RESPONSE);
        assert_eq!(filter.skipped_total(), 3);
    }

    #[tokio::test]
    async fn exceeding_the_bound_is_a_desync() {
        let gossip: VecDeque<Frame> = (0..20).map(|_| frame(EXCHANGE_PUBLIC_PEERS)).collect();
        let mut filter = GossipFilter::new(Scripted(gossip), 10);

        assert!(matches!(
            filter.next_frame().await,
            Err(OracleError::ProtocolDesync(10))
        ));
    }

    #[tokio::test]
    async fn inner_errors_propagate() {
        let mut filter = GossipFilter::new(Scripted(VecDeque::new()), 10);
        assert!(matches!(
            filter.next_frame().await,
            Err(OracleError::FrameTimeout(_))
        ));
    }
}
