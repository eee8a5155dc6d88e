//! Token-keyed job link, server side.
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! zeromq-rs ROUTER pushes peer identity as first frame on recv and pops it
//! on send. Workers connect with DEALER sockets, so:
//! - DEALER sends: `[topic, envelope]`
//! - ROUTER receives: `[identity, topic, envelope]`
//! - ROUTER sends: `[identity, topic, envelope]`
//! - DEALER receives: `[topic, envelope]`

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use zeromq::prelude::*;
use zeromq::{Endpoint, RouterSocket, ZmqMessage};

use crate::endpoint::LinkEndpoint;
use crate::error::LinkError;
use crate::handler::LinkHandler;
use crate::message::{Message, ENVELOPE_VERSION};
use crate::protocol::{
    ErrorReply, JobReply, PullJob, PushResult, ERROR_REPLY, JOB_REPLY, PULL_JOB, PUSH_RESULT,
    RESULT_ACK,
};

/// ROUTER-socket server answering job pulls and result pushes.
///
/// One background task owns the socket and alternates between receiving
/// requests and sending replies queued by per-request tasks, so a slow
/// handler answer for one worker never stalls the others.
pub struct LinkServer {
    endpoint: LinkEndpoint,
    shutdown: Option<oneshot::Sender<()>>,
    loop_handle: Option<JoinHandle<()>>,
}

impl LinkServer {
    /// Bind on an OS-assigned port of `host` and start serving on the
    /// current tokio runtime.
    #[instrument(skip_all, fields(host = %host))]
    pub async fn bind(host: &str, handler: Arc<dyn LinkHandler>) -> Result<Self, LinkError> {
        let mut socket = RouterSocket::new();
        let requested = LinkEndpoint::ephemeral(host);
        let bound = socket.bind(&requested.zmq_endpoint()).await?;
        let port = match bound {
            Endpoint::Tcp(_, port) => port,
            other => {
                return Err(LinkError::Transport(format!(
                    "expected a tcp endpoint, bound {other:?}"
                )))
            }
        };
        let endpoint = LinkEndpoint::new(host, port);
        info!(endpoint = %endpoint, "link server listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let loop_handle = tokio::spawn(Self::event_loop(socket, handler, shutdown_rx));

        Ok(Self {
            endpoint,
            shutdown: Some(shutdown_tx),
            loop_handle: Some(loop_handle),
        })
    }

    pub fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    /// Stop serving and wait for the socket to be released.
    pub async fn terminate(mut self) {
        self.signal_shutdown();
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }
        info!(endpoint = %self.endpoint, "link server terminated");
    }

    fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Single task owning the ROUTER socket.
    async fn event_loop(
        mut socket: RouterSocket,
        handler: Arc<dyn LinkHandler>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ZmqMessage>();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("link server loop stopping");
                    break;
                }
                // Outbound: a reply finished by a request task
                Some(reply) = reply_rx.recv() => {
                    if let Err(e) = socket.send(reply).await {
                        warn!(error = %e, "ROUTER send failed");
                    }
                }
                // Inbound: a worker request
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => match Self::split_request(zmq_msg) {
                            Ok((identity, request)) => {
                                let handler = Arc::clone(&handler);
                                let reply_tx = reply_tx.clone();
                                tokio::spawn(async move {
                                    let reply = Self::answer(&*handler, &request).await;
                                    match Self::frame_reply(identity, &reply) {
                                        Ok(frames) => {
                                            let _ = reply_tx.send(frames);
                                        }
                                        Err(e) => warn!(error = %e, "failed to encode link reply"),
                                    }
                                });
                            }
                            Err(e) => warn!(error = %e, "dropping malformed link request"),
                        },
                        Err(e) => {
                            debug!(error = %e, "ROUTER recv loop ending");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// ROUTER recv frames: `[identity, ...data_frames]`.
    fn split_request(zmq_msg: ZmqMessage) -> Result<(Vec<u8>, Message), LinkError> {
        let frames: Vec<_> = zmq_msg.iter().collect();

        if frames.len() < 2 {
            return Err(LinkError::Transport(format!(
                "expected at least 2 frames from ROUTER, got {}",
                frames.len()
            )));
        }

        let identity = frames[0].as_ref().to_vec();

        // Skip identity and any empty delimiter frames to find [topic, envelope].
        let data_frames: Vec<_> = frames[1..]
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            return Err(LinkError::Transport(format!(
                "expected [topic, envelope] after identity, got {} data frames",
                data_frames.len()
            )));
        }

        let message = Message::from_bytes(data_frames[1].as_ref())?;
        debug!(
            correlation_id = %message.correlation_id,
            topic = %message.topic,
            "received link request"
        );
        Ok((identity, message))
    }

    /// Always produce a reply; handler failures become [`ERROR_REPLY`].
    async fn answer(handler: &dyn LinkHandler, request: &Message) -> Message {
        match Self::dispatch(handler, request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(topic = %request.topic, error = %e, "rejecting link request");
                let payload = ErrorReply {
                    reason: e.to_string(),
                };
                // An ErrorReply always encodes; fall back to an empty payload just in case.
                Message::reply(request, ERROR_REPLY, &payload).unwrap_or_else(|_| Message {
                    topic: ERROR_REPLY.to_string(),
                    payload: Vec::new(),
                    timestamp: chrono::Utc::now(),
                    correlation_id: request.correlation_id,
                    version: ENVELOPE_VERSION,
                })
            }
        }
    }

    async fn dispatch(handler: &dyn LinkHandler, request: &Message) -> Result<Message, LinkError> {
        if request.version != ENVELOPE_VERSION {
            return Err(LinkError::Protocol(format!(
                "unsupported envelope version {}",
                request.version
            )));
        }
        match request.topic.as_str() {
            PULL_JOB => {
                let PullJob { token } = request.decode()?;
                let job = handler.pull_job(&token).await?;
                debug!(token = %token, delivered = job.is_some(), "answered job pull");
                Ok(Message::reply(request, JOB_REPLY, &JobReply { job })?)
            }
            PUSH_RESULT => {
                let PushResult { token, result } = request.decode()?;
                handler.push_result(&token, result).await?;
                debug!(token = %token, "accepted result push");
                Ok(Message::reply(request, RESULT_ACK, &())?)
            }
            other => Err(LinkError::Protocol(format!("unknown operation '{other}'"))),
        }
    }

    /// Frames sent: `[identity, topic, envelope]`.
    fn frame_reply(identity: Vec<u8>, reply: &Message) -> Result<ZmqMessage, LinkError> {
        let envelope_bytes = reply.to_bytes()?;
        let mut zmq_msg = ZmqMessage::from(identity);
        zmq_msg.push_back(reply.topic.as_bytes().to_vec().into());
        zmq_msg.push_back(envelope_bytes.into());
        Ok(zmq_msg)
    }
}

impl Drop for LinkServer {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_frames_lead_with_identity() {
        let req = Message::request(PULL_JOB, &PullJob { token: "t".into() }).unwrap();
        let reply = Message::reply(&req, JOB_REPLY, &JobReply { job: None }).unwrap();
        let frames = LinkServer::frame_reply(vec![9, 9], &reply).unwrap();
        let frames: Vec<_> = frames.iter().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].as_ref(), &[9, 9]);
        assert_eq!(frames[1].as_ref(), JOB_REPLY.as_bytes());
    }

    #[test]
    fn split_request_skips_delimiters() {
        let req = Message::request(PULL_JOB, &PullJob { token: "t".into() }).unwrap();
        let mut zmq_msg = ZmqMessage::from(vec![1u8, 2, 3]);
        zmq_msg.push_back(Vec::<u8>::new().into());
        zmq_msg.push_back(PULL_JOB.as_bytes().to_vec().into());
        zmq_msg.push_back(req.to_bytes().unwrap().into());

        let (identity, decoded) = LinkServer::split_request(zmq_msg).unwrap();
        assert_eq!(identity, vec![1, 2, 3]);
        assert_eq!(decoded.correlation_id, req.correlation_id);
    }

    #[test]
    fn split_request_rejects_short_messages() {
        let zmq_msg = ZmqMessage::from(vec![1u8]);
        assert!(matches!(
            LinkServer::split_request(zmq_msg),
            Err(LinkError::Transport(_))
        ));
    }
}
