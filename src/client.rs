//! Oracle protocol client
//!
//! One TCP session to a node. The protocol is not multiplexed: each request
//! is fully answered (through `END_RESPONSE`) before the next is written.
//! When a read fails part way through an answer, the rest of it is drained
//! before the next request goes out; if that fails the session is unusable.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{OracleError, Result};
use crate::protocol::decoder::{AnswerAccumulator, CurrentTickInfo, OracleQueryId, QueryInfo};
use crate::protocol::{
    encode, oracle_request_payload, FrameReader, FrameSource, GossipFilter, END_RESPONSE,
    REQUEST_CURRENT_TICK_INFO, REQUEST_ORACLE_DATA, REQ_ALL_QUERY_IDS, REQ_QUERY_AND_RESPONSE,
    RESPOND_CURRENT_TICK_INFO, RESPOND_ORACLE_DATA,
};

/// Upper bound on frames read for a single answer, gossip excluded
const MAX_ANSWER_FRAMES: usize = 4096;

pub struct OracleClient<S> {
    frames: GossipFilter<FrameReader<ReadHalf<S>>>,
    writer: WriteHalf<S>,
    peer: String,
    /// Terminal frame type of an answer not yet read to its end
    unfinished: Option<u8>,
}

impl OracleClient<TcpStream> {
    /// Open a session; failure here is fatal to the caller's run.
    pub async fn connect(config: &NodeConfig, cancel: CancellationToken) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(OracleError::Cancelled),
            res = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)) => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(OracleError::Connection { addr, reason: e.to_string() })
                }
                Err(_) => {
                    return Err(OracleError::Connection {
                        addr,
                        reason: format!("timed out after {:?}", connect_timeout),
                    })
                }
            },
        };
        stream.set_nodelay(true)?;
        info!(peer = %addr, "📡 Connected to node");

        Ok(Self::from_stream(
            stream,
            addr,
            Duration::from_millis(config.frame_timeout_ms),
            config.max_skipped_frames,
            cancel,
        ))
    }
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> OracleClient<S> {
    pub fn from_stream(
        stream: S,
        peer: String,
        frame_timeout: Duration,
        max_skipped_frames: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            frames: GossipFilter::new(
                FrameReader::new(reader, frame_timeout, cancel),
                max_skipped_frames,
            ),
            writer,
            peer,
            unfinished: None,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Discard what is left of an interrupted answer.
    async fn drain_unfinished(&mut self) -> Result<()> {
        let Some(terminal) = self.unfinished else {
            return Ok(());
        };
        let mut discarded = 0usize;
        for _ in 0..MAX_ANSWER_FRAMES {
            match self.frames.next_frame().await {
                Ok(frame) if frame.msg_type == terminal => {
                    self.unfinished = None;
                    warn!(peer = %self.peer, discarded, "⚠️ Drained late answer");
                    return Ok(());
                }
                Ok(_) => discarded += 1,
                Err(OracleError::ProtocolDesync(_)) => continue,
                Err(e) if e.is_unit_scoped() => {
                    return Err(OracleError::Connection {
                        addr: self.peer.clone(),
                        reason: format!("interrupted answer could not be drained: {}", e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        Err(OracleError::Connection {
            addr: self.peer.clone(),
            reason: format!("interrupted answer still open after {} frames", MAX_ANSWER_FRAMES),
        })
    }

    /// Write one request; `terminal` is the frame type that closes its answer.
    async fn send(&mut self, msg_type: u8, payload: &[u8], terminal: u8) -> Result<u32> {
        self.drain_unfinished().await?;
        let nonce: u32 = rand::random();
        let bytes = encode(msg_type, nonce, payload)?;
        self.unfinished = Some(terminal);
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(nonce)
    }

    /// Read `RESPOND_ORACLE_DATA` frames into an accumulator until `END_RESPONSE`.
    async fn read_oracle_answer(&mut self) -> Result<AnswerAccumulator> {
        let mut acc = AnswerAccumulator::new();
        for _ in 0..MAX_ANSWER_FRAMES {
            let frame = self.frames.next_frame().await?;
            match frame.msg_type {
                END_RESPONSE => {
                    self.unfinished = None;
                    return Ok(acc);
                }
                RESPOND_ORACLE_DATA => {
                    let (tag, chunk) = frame.oracle_chunk()?;
                    acc.push(tag, chunk);
                }
                other => debug!(msg_type = other, "ignoring unrelated frame inside answer"),
            }
        }
        Err(OracleError::MalformedFrame(format!(
            "no END_RESPONSE after {} frames",
            MAX_ANSWER_FRAMES
        )))
    }

    /// Ask the node for its current tick and epoch
    pub async fn get_tick_info(&mut self) -> Result<CurrentTickInfo> {
        self.send(REQUEST_CURRENT_TICK_INFO, &[], RESPOND_CURRENT_TICK_INFO)
            .await?;
        for _ in 0..MAX_ANSWER_FRAMES {
            let frame = self.frames.next_frame().await?;
            if frame.msg_type == RESPOND_CURRENT_TICK_INFO {
                self.unfinished = None;
                return CurrentTickInfo::decode(&frame.payload);
            }
            debug!(msg_type = frame.msg_type, "ignoring frame while waiting for tick info");
        }
        Err(OracleError::MalformedFrame(
            "no tick info among answer frames".to_string(),
        ))
    }

    /// All oracle query ids registered at `tick`, in node order
    pub async fn get_query_ids_at_tick(&mut self, tick: u32) -> Result<Vec<OracleQueryId>> {
        let payload = oracle_request_payload(REQ_ALL_QUERY_IDS, tick as u64);
        self.send(REQUEST_ORACLE_DATA, &payload, END_RESPONSE).await?;
        let ids = self.read_oracle_answer().await?.query_ids();
        debug!(tick, count = ids.len(), "query ids received");
        Ok(ids)
    }

    /// Metadata, pair and reply for one query
    pub async fn get_query_info(&mut self, query_id: OracleQueryId) -> Result<QueryInfo> {
        let payload = oracle_request_payload(REQ_QUERY_AND_RESPONSE, query_id as u64);
        self.send(REQUEST_ORACLE_DATA, &payload, END_RESPONSE).await?;
        Ok(self.read_oracle_answer().await?.query_info())
    }

    pub fn skipped_gossip(&self) -> u64 {
        self.frames.skipped_total()
    }

    /// Close the write side; the read side drops with the client.
    pub async fn shutdown(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        debug!(peer = %self.peer, skipped_gossip = self.frames.skipped_total(), "session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::test_bytes::*;
    use crate::protocol::{
        EXCHANGE_PUBLIC_PEERS, RESP_QUERY_DATA, RESP_QUERY_IDS, RESP_QUERY_METADATA,
        RESP_REPLY_DATA,
    };
    use crate::types::QueryStatus;
    use tokio::io::DuplexStream;

    fn oracle_frame(tag: u32, chunk: &[u8]) -> Vec<u8> {
        let mut payload = tag.to_le_bytes().to_vec();
        payload.extend_from_slice(chunk);
        encode(RESPOND_ORACLE_DATA, 1, &payload).unwrap()
    }

    fn end_frame() -> Vec<u8> {
        encode(END_RESPONSE, 1, &[]).unwrap()
    }

    // Requests carry a random nonce, so the node side is a plain duplex end
    // with the answer pre-written instead of a scripted byte-exact mock.
    fn duplex_client(frame_timeout: Duration) -> (OracleClient<DuplexStream>, DuplexStream) {
        let (client_io, node_io) = tokio::io::duplex(4096);
        let client = OracleClient::from_stream(
            client_io,
            "duplex".into(),
            frame_timeout,
            10,
            CancellationToken::new(),
        );
        (client, node_io)
    }

    #[tokio::test]
    async fn query_ids_across_frames_with_gossip() {
        let mut ids = Vec::new();
        for id in [11i64, 12, 13] {
            ids.extend_from_slice(&id.to_le_bytes());
        }
        let mut answer = oracle_frame(RESP_QUERY_IDS, &ids[..12]);
        answer.extend(encode(EXCHANGE_PUBLIC_PEERS, 9, &[0; 16]).unwrap());
        answer.extend(oracle_frame(RESP_QUERY_IDS, &ids[12..]));
        answer.extend(end_frame());

        let (mut client, mut node_io) = duplex_client(Duration::from_secs(1));
        node_io.write_all(&answer).await.unwrap();

        let got = client.get_query_ids_at_tick(100).await.unwrap();
        assert_eq!(got, vec![11, 12, 13]);
        assert_eq!(client.skipped_gossip(), 1);
    }

    #[tokio::test]
    async fn query_info_assembles_split_reply() {
        let reply = reply_bytes(3, 1);
        let pair = pair_bytes("X", "A", "B");
        let mut answer = oracle_frame(RESP_QUERY_METADATA, &metadata_bytes(5, 3, 100));
        answer.extend(oracle_frame(RESP_QUERY_DATA, &pair[..60]));
        answer.extend(oracle_frame(RESP_QUERY_DATA, &pair[60..]));
        answer.extend(oracle_frame(RESP_REPLY_DATA, &reply[..8]));
        answer.extend(oracle_frame(RESP_REPLY_DATA, &reply[8..]));
        answer.extend(end_frame());

        let (mut client, mut node_io) = duplex_client(Duration::from_secs(1));
        node_io.write_all(&answer).await.unwrap();

        let info = client.get_query_info(5).await.unwrap();
        assert_eq!(info.status, QueryStatus::Success);
        assert_eq!(info.price, Some(3.0));
        let pair = info.pair.unwrap();
        assert_eq!((pair.oracle.as_str(), pair.currency1.as_str()), ("X", "A"));
    }

    #[tokio::test]
    async fn tick_info_skips_unrelated_frames() {
        let mut payload = vec![0u8; 16];
        payload[2..4].copy_from_slice(&150u16.to_le_bytes());
        payload[4..8].copy_from_slice(&4_200u32.to_le_bytes());
        let mut bytes = end_frame();
        bytes.extend(encode(RESPOND_CURRENT_TICK_INFO, 3, &payload).unwrap());

        let (mut client, mut node_io) = duplex_client(Duration::from_secs(1));
        node_io.write_all(&bytes).await.unwrap();

        let info = client.get_tick_info().await.unwrap();
        assert_eq!(info.tick, 4_200);
        assert_eq!(info.epoch, 150);
    }

    #[tokio::test]
    async fn request_frame_is_well_formed() {
        use tokio::io::AsyncReadExt;

        let (mut client, mut node_io) = duplex_client(Duration::from_millis(50));
        node_io.write_all(&end_frame()).await.unwrap();
        client.get_query_ids_at_tick(77).await.unwrap();

        let mut req = [0u8; 24];
        node_io.read_exact(&mut req).await.unwrap();
        assert_eq!(&req[..3], &[24, 0, 0]);
        assert_eq!(req[3], REQUEST_ORACLE_DATA);
        assert_eq!(&req[8..12], &REQ_ALL_QUERY_IDS.to_le_bytes());
        assert_eq!(&req[16..24], &77u64.to_le_bytes());
    }

    #[tokio::test]
    async fn late_answer_is_drained_before_next_request() {
        let (mut client, mut node_io) = duplex_client(Duration::from_millis(100));
        let node = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut req = [0u8; 24];
            node_io.read_exact(&mut req).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            let mut late = oracle_frame(RESP_QUERY_IDS, &5i64.to_le_bytes());
            late.extend(end_frame());
            node_io.write_all(&late).await.unwrap();

            node_io.read_exact(&mut req).await.unwrap();
            assert_eq!(&req[16..24], &101u64.to_le_bytes());
            node_io.write_all(&end_frame()).await.unwrap();
            node_io
        });

        assert!(matches!(
            client.get_query_ids_at_tick(100).await,
            Err(OracleError::FrameTimeout(_))
        ));
        assert_eq!(client.get_query_ids_at_tick(101).await.unwrap(), Vec::<i64>::new());
        node.await.unwrap();
    }

    #[tokio::test]
    async fn undrainable_answer_makes_session_unusable() {
        let (mut client, _node_io) = duplex_client(Duration::from_millis(20));
        assert!(matches!(
            client.get_query_ids_at_tick(100).await,
            Err(OracleError::FrameTimeout(_))
        ));
        let err = client.get_query_ids_at_tick(101).await.unwrap_err();
        assert!(matches!(err, OracleError::Connection { .. }));
        assert!(!err.is_unit_scoped());
    }

    #[tokio::test]
    async fn silent_node_times_out() {
        let (mut client, _node_io) = duplex_client(Duration::from_millis(20));
        assert!(matches!(
            client.get_query_ids_at_tick(1).await,
            Err(OracleError::FrameTimeout(_))
        ));
    }
}
