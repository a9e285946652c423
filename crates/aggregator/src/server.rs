//! Server assembly: owns the shared pieces and spawns one scheduler per
//! connected prover.

use std::{collections::HashSet, sync::Arc, time::Duration};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};
use zkagg_state::StateDb;
use zkagg_tasks::{ShutdownGuard, TaskExecutor};

use crate::{
    config::AggregatorConfig,
    errors::AggregatorError,
    profitability::ProfitabilityGate,
    prover::ProverChannel,
    repository::ProofRepository,
    scheduler::AggregationScheduler,
    submitter::{FinalProofSubmitter, SubmissionSchedule},
    settlement::SettlementClient,
};

const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Accepts prover connections and runs the aggregation pipeline over them.
/// The submission schedule and claim repository are built once here and
/// shared by every scheduler, which is what serializes claims and final
/// proof submissions across provers.
pub struct AggregatorServer {
    config: AggregatorConfig,
    db: Arc<dyn StateDb>,
    settlement: Arc<dyn SettlementClient>,
    repo: Arc<ProofRepository>,
    gate: Arc<ProfitabilityGate>,
    submitter: Arc<FinalProofSubmitter>,
    executor: TaskExecutor,
    connected: Arc<RwLock<HashSet<String>>>,
}

impl AggregatorServer {
    pub fn new(
        config: AggregatorConfig,
        db: Arc<dyn StateDb>,
        settlement: Arc<dyn SettlementClient>,
        executor: TaskExecutor,
    ) -> Self {
        let repo = Arc::new(ProofRepository::new(db.clone()));
        let schedule = Arc::new(SubmissionSchedule::new(config.final_proof_interval()));
        let gate = Arc::new(ProfitabilityGate::from_config(
            &config.profitability,
            schedule.clone(),
        ));
        let submitter = Arc::new(FinalProofSubmitter::new(
            db.clone(),
            settlement.clone(),
            schedule,
            SYNC_POLL_INTERVAL,
            config.mock_exit_root,
        ));
        Self {
            config,
            db,
            settlement,
            repo,
            gate,
            submitter,
            executor,
            connected: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Identity strings of the currently connected provers.
    pub fn connected_provers(&self) -> Vec<String> {
        self.connected.read().iter().cloned().collect()
    }

    /// Accept loop. Purges stale claims left by a previous instance, then
    /// spawns a scheduler for every prover handed over `incoming` until
    /// shutdown or the transport side closes the channel.
    pub async fn run(
        &self,
        mut incoming: mpsc::Receiver<Arc<dyn ProverChannel>>,
        shutdown: ShutdownGuard,
    ) -> Result<(), AggregatorError> {
        let purged = self.repo.purge_stale_locks()?;
        if purged > 0 {
            warn!(purged, "purged stale proof claims from a previous run");
        }

        loop {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => break,
                conn = incoming.recv() => match conn {
                    Some(channel) => self.spawn_scheduler(channel),
                    None => {
                        info!("prover transport closed, stopping accept loop");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    fn spawn_scheduler(&self, channel: Arc<dyn ProverChannel>) {
        let prover_id = channel.id().to_owned();
        info!(prover = %prover_id, "prover connected");
        self.connected.write().insert(prover_id.clone());

        let scheduler = AggregationScheduler::new(
            channel,
            self.repo.clone(),
            self.db.clone(),
            self.gate.clone(),
            self.submitter.clone(),
            self.settlement.clone(),
            self.config.chain_id,
            self.config.tick_interval(),
        );
        let connected = self.connected.clone();
        self.executor
            .spawn_critical_async_with_shutdown("prover-scheduler", move |shutdown| async move {
                scheduler.run(shutdown).await;
                connected.write().remove(&prover_id);
            });
    }
}

#[cfg(test)]
mod tests {
    use zkagg_state::{MemStateDb, ProofRecord};
    use zkagg_tasks::TaskManager;

    use super::*;
    use crate::{prover::mock::MockProver, settlement::mock::MockSettlement};

    fn config() -> AggregatorConfig {
        AggregatorConfig {
            tick_interval_secs: 1,
            final_proof_interval_secs: 3600,
            chain_id: 1001,
            profitability: Default::default(),
            mock_exit_root: None,
        }
    }

    #[tokio::test]
    async fn test_startup_purges_stale_claims() {
        let db = Arc::new(MemStateDb::new());
        db.insert_proof(&ProofRecord::claimed(3, "dead")).unwrap();
        let mut locked = ProofRecord::claimed(4, "dead");
        locked.proof_payload = Some("proof-4".to_owned());
        db.insert_proof(&locked).unwrap();

        let manager = TaskManager::new(tokio::runtime::Handle::current());
        let server = AggregatorServer::new(
            config(),
            db.clone(),
            Arc::new(MockSettlement::new(0)),
            manager.executor(),
        );

        let (_tx, rx) = mpsc::channel(1);
        let signal = manager.shutdown_signal();
        signal.send();
        server.run(rx, signal.guard()).await.unwrap();

        // The bare claim is gone, the completed one survives unlocked.
        let records = db.proof_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].batch_start, 4);
        assert!(!records[0].generating);
    }

    #[tokio::test]
    async fn test_spawns_and_tracks_scheduler_per_prover() {
        let db = Arc::new(MemStateDb::new());
        let manager = TaskManager::new(tokio::runtime::Handle::current());
        let server = AggregatorServer::new(
            config(),
            db,
            Arc::new(MockSettlement::new(0)),
            manager.executor(),
        );

        let (tx, rx) = mpsc::channel::<Arc<dyn ProverChannel>>(1);
        let signal = manager.shutdown_signal();
        let guard = signal.guard();

        tx.send(Arc::new(MockProver::new("p1"))).await.unwrap();
        let run = server.run(rx, guard);
        tokio::pin!(run);

        // Let the accept loop pick up the connection.
        tokio::select! {
            _ = &mut run => panic!("accept loop ended early"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert_eq!(server.connected_provers(), vec!["p1".to_owned()]);

        signal.send();
        run.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.connected_provers().is_empty());
    }
}
