//! Newline-delimited JSON transport for prover connections.
//!
//! The server is the only side that issues requests; the prover answers each
//! one. Requests carry a correlation id so a response left behind by a
//! cancelled wait can be recognized and discarded instead of being matched to
//! the wrong request.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zkagg_aggregator::{
    errors::ProverError,
    input::ProverInput,
    prover::{FinalProof, FinalPublicInputs, ProverChannel},
};
use zkagg_tasks::ShutdownGuard;

const PROOF_POLL_SECS_ENVVAR: &str = "ZKAGG_PROOF_POLL_SECS";
const DEFAULT_PROOF_POLL_SECS: u64 = 2;

/// How long a fresh connection gets to answer the hello exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a> {
    request_id: Uuid,
    #[serde(flatten)]
    body: Request<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request<'a> {
    Hello,
    Status,
    BatchProof {
        input: &'a ProverInput,
    },
    AggregateProof {
        recursive_proof_1: &'a str,
        recursive_proof_2: &'a str,
    },
    FinalProof {
        recursive_proof: &'a str,
        aggregator_addr: Address,
    },
    ProofResult {
        job_id: &'a str,
    },
    FinalProofResult {
        job_id: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    request_id: Uuid,
    #[serde(flatten)]
    body: Response,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response {
    Hello {
        prover_id: String,
    },
    Status {
        idle: bool,
    },
    JobAccepted {
        job_id: String,
    },
    JobRejected {
        reason: String,
    },
    /// Job is still running; poll again later.
    Pending,
    ProofResult {
        payload: String,
    },
    FinalProofResult {
        payload: String,
        input_hash: B256,
        new_local_exit_root: B256,
    },
    Error {
        message: String,
    },
}

struct Io {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// One prover connection speaking the JSON-lines protocol. Requests are
/// serialized by the io mutex, so concurrent callers take lock-step turns on
/// the wire.
pub struct TcpProverChannel {
    id: String,
    peer: SocketAddr,
    io: tokio::sync::Mutex<Io>,
    poll_interval: Duration,
}

impl TcpProverChannel {
    /// Performs the hello exchange on a fresh connection and returns the
    /// identified channel.
    pub async fn handshake(stream: TcpStream, peer: SocketAddr) -> Result<Self, ProverError> {
        let (read_half, write_half) = stream.into_split();
        let mut channel = Self {
            id: String::new(),
            peer,
            io: tokio::sync::Mutex::new(Io {
                reader: BufReader::new(read_half),
                writer: write_half,
            }),
            poll_interval: Duration::from_secs(zkagg_common::parse_env_or(
                PROOF_POLL_SECS_ENVVAR,
                DEFAULT_PROOF_POLL_SECS,
            )),
        };
        match channel.request(Request::Hello).await? {
            Response::Hello { prover_id } => channel.id = prover_id,
            other => {
                return Err(ProverError::BadResponse(format!(
                    "expected hello, got {other:?}"
                )))
            }
        }
        Ok(channel)
    }

    #[cfg(test)]
    fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    async fn request(&self, body: Request<'_>) -> Result<Response, ProverError> {
        let mut io = self.io.lock().await;
        let envelope = RequestEnvelope {
            request_id: Uuid::new_v4(),
            body,
        };
        let mut line = serde_json::to_string(&envelope)
            .map_err(|err| ProverError::Transport(err.to_string()))?;
        line.push('\n');
        io.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|_| ProverError::Disconnected)?;

        loop {
            let mut buf = String::new();
            let n = io
                .reader
                .read_line(&mut buf)
                .await
                .map_err(|_| ProverError::Disconnected)?;
            if n == 0 {
                return Err(ProverError::Disconnected);
            }
            let response: ResponseEnvelope = serde_json::from_str(buf.trim_end())
                .map_err(|err| ProverError::BadResponse(err.to_string()))?;
            if response.request_id != envelope.request_id {
                // Leftover answer to a request whose wait was cancelled.
                debug!(peer = %self.peer, "discarding stale prover response");
                continue;
            }
            return match response.body {
                Response::Error { message } => Err(ProverError::Transport(message)),
                body => Ok(body),
            };
        }
    }

    async fn start_job(&self, body: Request<'_>) -> Result<String, ProverError> {
        match self.request(body).await? {
            Response::JobAccepted { job_id } => Ok(job_id),
            Response::JobRejected { reason } => Err(ProverError::Rejected(reason)),
            other => Err(ProverError::BadResponse(format!(
                "expected job ack, got {other:?}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ProverChannel for TcpProverChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_idle(&self) -> Result<bool, ProverError> {
        match self.request(Request::Status).await? {
            Response::Status { idle } => Ok(idle),
            other => Err(ProverError::BadResponse(format!(
                "expected status, got {other:?}"
            ))),
        }
    }

    async fn start_batch_proof(&self, input: &ProverInput) -> Result<String, ProverError> {
        self.start_job(Request::BatchProof { input }).await
    }

    async fn start_aggregation(
        &self,
        proof_a: &str,
        proof_b: &str,
    ) -> Result<String, ProverError> {
        self.start_job(Request::AggregateProof {
            recursive_proof_1: proof_a,
            recursive_proof_2: proof_b,
        })
        .await
    }

    async fn start_final_proof(
        &self,
        proof: &str,
        aggregator_addr: Address,
    ) -> Result<String, ProverError> {
        self.start_job(Request::FinalProof {
            recursive_proof: proof,
            aggregator_addr,
        })
        .await
    }

    async fn wait_recursive_proof(&self, job_id: &str) -> Result<String, ProverError> {
        loop {
            match self.request(Request::ProofResult { job_id }).await? {
                Response::Pending => tokio::time::sleep(self.poll_interval).await,
                Response::ProofResult { payload } => return Ok(payload),
                other => {
                    return Err(ProverError::BadResponse(format!(
                        "expected proof result, got {other:?}"
                    )))
                }
            }
        }
    }

    async fn wait_final_proof(&self, job_id: &str) -> Result<FinalProof, ProverError> {
        loop {
            match self.request(Request::FinalProofResult { job_id }).await? {
                Response::Pending => tokio::time::sleep(self.poll_interval).await,
                Response::FinalProofResult {
                    payload,
                    input_hash,
                    new_local_exit_root,
                } => {
                    return Ok(FinalProof {
                        payload,
                        public: FinalPublicInputs {
                            input_hash,
                            new_local_exit_root,
                        },
                    })
                }
                other => {
                    return Err(ProverError::BadResponse(format!(
                        "expected final proof result, got {other:?}"
                    )))
                }
            }
        }
    }
}

/// Accepts prover connections and hands identified channels to the server's
/// accept loop until shutdown.
pub async fn accept_loop(
    listener: TcpListener,
    connections: mpsc::Sender<Arc<dyn ProverChannel>>,
    shutdown: ShutdownGuard,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "incoming prover connection");
                    // Handshake off the accept loop so one unresponsive
                    // client cannot hold up the others.
                    let connections = connections.clone();
                    tokio::spawn(async move {
                        match tokio::time::timeout(
                            HANDSHAKE_TIMEOUT,
                            TcpProverChannel::handshake(stream, peer),
                        )
                        .await
                        {
                            Ok(Ok(channel)) => {
                                let _ = connections.send(Arc::new(channel)).await;
                            }
                            Ok(Err(err)) => warn!(%peer, %err, "prover handshake failed"),
                            Err(_) => warn!(%peer, "prover handshake timed out"),
                        }
                    });
                }
                Err(err) => warn!(%err, "accepting prover connection failed"),
            },
        }
    }
    info!("prover listener stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    /// Minimal scripted prover: answers hello, one status probe, one batch
    /// job, and polls for its result (pending once, then done).
    async fn fake_prover(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;
        let mut pending_sent = false;

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let req: Value = serde_json::from_str(line.trim_end()).unwrap();
            let request_id = req["request_id"].clone();
            let reply = match req["type"].as_str().unwrap() {
                "hello" => json!({"request_id": request_id, "type": "hello", "prover_id": "fake-1"}),
                "status" => json!({"request_id": request_id, "type": "status", "idle": true}),
                "batch_proof" => {
                    json!({"request_id": request_id, "type": "job_accepted", "job_id": "j1"})
                }
                "proof_result" if !pending_sent => {
                    pending_sent = true;
                    json!({"request_id": request_id, "type": "pending"})
                }
                "proof_result" => {
                    json!({"request_id": request_id, "type": "proof_result", "payload": "P"})
                }
                other => panic!("unexpected request {other}"),
            };
            let mut out = reply.to_string();
            out.push('\n');
            writer.write_all(out.as_bytes()).await.unwrap();
        }
    }

    fn sample_input() -> ProverInput {
        serde_json::from_value(json!({
            "public_inputs": {
                "old_state_root": B256::ZERO,
                "old_batch_num": 0,
                "chain_id": 1001,
                "batch_l2_data": "0102",
                "global_exit_root": B256::ZERO,
                "eth_timestamp": 1_700_000_000u64,
                "sequencer_addr": Address::ZERO,
                "aggregator_addr": Address::ZERO,
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_batch_proof_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_prover(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut channel = TcpProverChannel::handshake(stream, addr).await.unwrap();
        channel.set_poll_interval(Duration::from_millis(5));
        assert_eq!(channel.id(), "fake-1");

        assert!(channel.is_idle().await.unwrap());
        let job_id = channel.start_batch_proof(&sample_input()).await.unwrap();
        assert_eq!(job_id, "j1");
        let payload = channel.wait_recursive_proof(&job_id).await.unwrap();
        assert_eq!(payload, "P");
    }

    #[tokio::test]
    async fn test_silent_client_does_not_block_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let signal = zkagg_tasks::ShutdownSignal::new();
        tokio::spawn(accept_loop(listener, tx, signal.guard()));

        // Connects and never answers the hello.
        let _mute = TcpStream::connect(addr).await.unwrap();

        // A well-behaved prover right behind it still gets through.
        tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut writer = write_half;
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let req: Value = serde_json::from_str(line.trim_end()).unwrap();
            let reply = json!({
                "request_id": req["request_id"],
                "type": "hello",
                "prover_id": "fake-2",
            });
            writer
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
        });

        let channel = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("handshake should finish while the silent client idles")
            .unwrap();
        assert_eq!(channel.id(), "fake-2");
        signal.send();
    }

    #[tokio::test]
    async fn test_closed_connection_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and immediately drop the connection.
            let _ = listener.accept().await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let err = match TcpProverChannel::handshake(stream, addr).await {
            Ok(_) => panic!("handshake should fail on a closed connection"),
            Err(err) => err,
        };
        assert!(matches!(err, ProverError::Disconnected));
    }
}
