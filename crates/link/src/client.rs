//! Token-keyed job link, worker side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, ZmqMessage};

use forkstress_core::{Job, TestResult};

use crate::endpoint::LinkEndpoint;
use crate::error::LinkError;
use crate::message::Message;
use crate::protocol::{
    ErrorReply, JobReply, PullJob, PushResult, ERROR_REPLY, JOB_REPLY, PULL_JOB, PUSH_RESULT,
    RESULT_ACK,
};

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>>;

/// DEALER-socket client a worker uses to pull its job and push its result.
///
/// The socket is owned by a background task that multiplexes outbound
/// requests and inbound replies; replies are routed to callers by
/// `correlation_id`.
pub struct LinkClient {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: PendingMap,
    timeout: Duration,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl LinkClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connect a DEALER socket to the server at `endpoint`.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &LinkEndpoint) -> Result<Self, LinkError> {
        let mut socket = DealerSocket::new();
        socket.connect(&endpoint.zmq_endpoint()).await?;
        info!("connected to link server");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(16);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending).await;
        });

        Ok(Self {
            send_tx,
            pending,
            timeout: Self::DEFAULT_TIMEOUT,
            _loop_handle: loop_handle,
        })
    }

    /// Override how long a single request waits for its reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask for the job bound to `token`. `None` means it was already taken.
    pub async fn pull_job(&self, token: &str) -> Result<Option<Job>, LinkError> {
        let request = Message::request(
            PULL_JOB,
            &PullJob {
                token: token.to_string(),
            },
        )?;
        let reply = self.request(request).await?;
        expect_topic(&reply, JOB_REPLY)?;
        let JobReply { job } = reply.decode()?;
        Ok(job)
    }

    /// Hand back the result for `token`.
    pub async fn push_result(&self, token: &str, result: TestResult) -> Result<(), LinkError> {
        let request = Message::request(
            PUSH_RESULT,
            &PushResult {
                token: token.to_string(),
                result,
            },
        )?;
        let reply = self.request(request).await?;
        expect_topic(&reply, RESULT_ACK)
    }

    /// Send a request and wait for the reply matched by `correlation_id`.
    async fn request(&self, msg: Message) -> Result<Message, LinkError> {
        let cid = msg.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(cid, tx);

        let mut zmq_msg = ZmqMessage::from(msg.topic.as_str());
        zmq_msg.push_back(msg.to_bytes()?.into());
        if self.send_tx.send(zmq_msg).await.is_err() {
            self.pending.lock().await.remove(&cid);
            return Err(LinkError::Transport("client event loop closed".into()));
        }
        debug!(correlation_id = %cid, topic = %msg.topic, "sent link request");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&cid);
                Err(LinkError::Transport("reply channel closed unexpectedly".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&cid);
                Err(LinkError::Timeout(self.timeout))
            }
        }
    }

    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: PendingMap,
    ) {
        loop {
            tokio::select! {
                Some(zmq_msg) = send_rx.recv() => {
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => Self::dispatch_reply(&pending, zmq_msg).await,
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    /// Route an inbound reply to the waiting caller.
    async fn dispatch_reply(pending: &Mutex<HashMap<Uuid, oneshot::Sender<Message>>>, zmq_msg: ZmqMessage) {
        let frames: Vec<_> = zmq_msg.iter().collect();
        let data_frames: Vec<_> = frames
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            warn!(frame_count = frames.len(), "unexpected frame count on DEALER recv");
            return;
        }

        let message = match Message::from_bytes(data_frames[1].as_ref()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to decode link reply");
                return;
            }
        };

        match pending.lock().await.remove(&message.correlation_id) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!(correlation_id = %message.correlation_id, "reply for unknown correlation_id"),
        }
    }
}

/// Turn an error reply into an error, and reject unexpected topics.
fn expect_topic(reply: &Message, topic: &str) -> Result<(), LinkError> {
    if reply.topic == topic {
        return Ok(());
    }
    if reply.topic == ERROR_REPLY {
        let reason = reply
            .decode::<ErrorReply>()
            .map(|e| e.reason)
            .unwrap_or_else(|_| "unreadable error reply".into());
        return Err(LinkError::Protocol(reason));
    }
    Err(LinkError::Protocol(format!(
        "expected '{topic}' reply, got '{}'",
        reply.topic
    )))
}
