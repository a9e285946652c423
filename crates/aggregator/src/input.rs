//! Prover input construction and the independent public-input hash.

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use zkagg_state::{Batch, StateDb};

use crate::errors::AggregatorError;

/// Order of the BN254 scalar field; worker-reported input hashes are reduced
/// into it.
const SCALAR_FIELD_ORDER: U256 = U256::from_limbs([
    0x43e1f593f0000001,
    0x2833e84879b97091,
    0xb85045b68181585d,
    0x30644e72e131a029,
]);

/// Public inputs for a single-batch proof job, assembled from the batch's
/// on-chain fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub old_state_root: B256,
    pub old_batch_num: u64,
    pub chain_id: u64,
    #[serde(with = "hex::serde")]
    pub batch_l2_data: Vec<u8>,
    pub global_exit_root: B256,
    pub eth_timestamp: u64,
    pub sequencer_addr: Address,
    pub aggregator_addr: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverInput {
    pub public_inputs: PublicInputs,
}

/// Builds the input for proving `batch`, pulling the previous batch's state
/// root from the state collaborator. A missing previous batch (genesis, or a
/// state view that has not caught up) yields a zero old-state-root.
pub fn build_prover_input(
    db: &dyn StateDb,
    batch: &Batch,
    chain_id: u64,
    aggregator_addr: Address,
) -> Result<ProverInput, AggregatorError> {
    let previous = match batch.number.checked_sub(1) {
        Some(prev_num) => db.batch_by_number(prev_num)?,
        None => None,
    };
    let old_state_root = previous.map(|b| b.state_root).unwrap_or_default();

    Ok(ProverInput {
        public_inputs: PublicInputs {
            old_state_root,
            old_batch_num: batch.number.saturating_sub(1),
            chain_id,
            batch_l2_data: batch.l2_data.clone(),
            global_exit_root: batch.global_exit_root,
            eth_timestamp: batch.timestamp,
            sequencer_addr: batch.coinbase,
            aggregator_addr,
        },
    })
}

/// Independently computes the public-input hash a worker is expected to
/// report for `inputs`: keccak over the canonical field encoding, reduced mod
/// the scalar field order.
pub fn public_input_hash(inputs: &PublicInputs) -> B256 {
    let mut buf = Vec::with_capacity(160 + inputs.batch_l2_data.len());
    buf.extend_from_slice(inputs.old_state_root.as_slice());
    buf.extend_from_slice(inputs.global_exit_root.as_slice());
    buf.extend_from_slice(&inputs.old_batch_num.to_be_bytes());
    buf.extend_from_slice(&inputs.chain_id.to_be_bytes());
    buf.extend_from_slice(&inputs.eth_timestamp.to_be_bytes());
    buf.extend_from_slice(inputs.sequencer_addr.as_slice());
    buf.extend_from_slice(inputs.aggregator_addr.as_slice());
    buf.extend_from_slice(keccak256(&inputs.batch_l2_data).as_slice());

    let hash = U256::from_be_bytes(keccak256(&buf).0);
    B256::from(hash.reduce_mod(SCALAR_FIELD_ORDER))
}

#[cfg(test)]
mod tests {
    use zkagg_state::MemStateDb;

    use super::*;

    fn batch(number: u64) -> Batch {
        Batch {
            number,
            timestamp: 1_700_000_000,
            global_exit_root: B256::repeat_byte(0x22),
            coinbase: Address::repeat_byte(0x33),
            state_root: B256::repeat_byte(0x44),
            l2_data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_build_uses_previous_state_root() {
        let db = MemStateDb::new();
        db.put_batch(batch(6));
        db.put_batch(batch(7));

        let input =
            build_prover_input(&db, &batch(7), 1001, Address::repeat_byte(0xaa)).unwrap();
        assert_eq!(input.public_inputs.old_batch_num, 6);
        assert_eq!(input.public_inputs.old_state_root, B256::repeat_byte(0x44));
        assert_eq!(input.public_inputs.chain_id, 1001);
    }

    #[test]
    fn test_build_without_previous_batch() {
        let db = MemStateDb::new();
        let input =
            build_prover_input(&db, &batch(1), 1001, Address::repeat_byte(0xaa)).unwrap();
        assert_eq!(input.public_inputs.old_state_root, B256::ZERO);
        assert_eq!(input.public_inputs.old_batch_num, 0);
    }

    #[test]
    fn test_hash_is_deterministic_and_sensitive() {
        let db = MemStateDb::new();
        let input =
            build_prover_input(&db, &batch(3), 1001, Address::repeat_byte(0xaa)).unwrap();

        let h1 = public_input_hash(&input.public_inputs);
        let h2 = public_input_hash(&input.public_inputs);
        assert_eq!(h1, h2);

        let mut other = input.public_inputs.clone();
        other.eth_timestamp += 1;
        assert_ne!(h1, public_input_hash(&other));
    }

    #[test]
    fn test_hash_fits_scalar_field() {
        let db = MemStateDb::new();
        let input =
            build_prover_input(&db, &batch(3), 1001, Address::repeat_byte(0xaa)).unwrap();
        let hash = U256::from_be_bytes(public_input_hash(&input.public_inputs).0);
        assert!(hash < SCALAR_FIELD_ORDER);
    }

    #[test]
    fn test_input_json_round_trip() {
        let db = MemStateDb::new();
        let input =
            build_prover_input(&db, &batch(3), 1001, Address::repeat_byte(0xaa)).unwrap();
        let encoded = serde_json::to_string(&input).unwrap();
        let decoded: ProverInput = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, input);
    }
}
