// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The quorum policy: a pure function from the active witness set and the
//! received attestations to the aggregated signature payload.

use std::collections::HashSet;

use bridge_relayer_types::{RelayError, RelayResult, WitnessSignature};
use ethers::types::Address;
use tracing::info;

/// Aggregation result: the accepted signers in payload order and the
/// concatenated signature bytes the validator contract verifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumPayload {
    pub signers: Vec<Address>,
    pub payload: Vec<u8>,
}

/// Filters `signatures` down to the active witness set, enforces the strict
/// two-thirds super-majority `3·|S| > 2·|W|`, and concatenates the surviving
/// signatures ascending by witness address — the order in which the
/// destination contract walks the payload during verification.
///
/// Signatures from inactive witnesses are skipped with a notice; duplicate
/// attestations from one witness count once.
pub fn aggregate(
    active: &HashSet<Address>,
    signatures: &[WitnessSignature],
) -> RelayResult<QuorumPayload> {
    let mut accepted: Vec<&WitnessSignature> = Vec::with_capacity(signatures.len());
    let mut seen: HashSet<Address> = HashSet::with_capacity(signatures.len());
    for signature in signatures {
        if !active.contains(&signature.witness) {
            info!("witness {:#x} is inactive", signature.witness);
            continue;
        }
        if seen.insert(signature.witness) {
            accepted.push(signature);
        }
    }

    if accepted.len() * 3 <= active.len() * 2 {
        return Err(RelayError::InsufficientWitnesses);
    }

    accepted.sort_by_key(|s| s.witness);
    let payload = accepted
        .iter()
        .flat_map(|s| s.signature.iter().copied())
        .collect();
    Ok(QuorumPayload {
        signers: accepted.into_iter().map(|s| s.witness).collect(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_relayer_types::TransferKey;
    use proptest::prelude::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn sig(witness: Address, bytes: &[u8]) -> WitnessSignature {
        WitnessSignature {
            transfer: TransferKey::new(addr(0xaa), addr(0xbb), 1),
            witness,
            signature: bytes.to_vec(),
        }
    }

    fn active(addrs: &[Address]) -> HashSet<Address> {
        addrs.iter().copied().collect()
    }

    #[test]
    fn test_two_of_three_passes_in_address_order() {
        let w = active(&[addr(1), addr(2), addr(3)]);
        // Received out of address order
        let sigs = vec![sig(addr(2), b"sig-two"), sig(addr(1), b"sig-one")];
        let quorum = aggregate(&w, &sigs).unwrap();
        assert_eq!(quorum.signers, vec![addr(1), addr(2)]);
        assert_eq!(quorum.payload, b"sig-onesig-two".to_vec());
    }

    #[test]
    fn test_one_of_three_is_insufficient() {
        let w = active(&[addr(1), addr(2), addr(3)]);
        let sigs = vec![sig(addr(1), b"sig-one")];
        assert!(matches!(
            aggregate(&w, &sigs),
            Err(RelayError::InsufficientWitnesses)
        ));
    }

    #[test]
    fn test_exact_two_thirds_is_insufficient() {
        // 4 of 6 is exactly two thirds; the rule is a strict majority
        let members: Vec<Address> = (1..=6).map(addr).collect();
        let w = active(&members);
        let sigs: Vec<_> = members[..4].iter().map(|a| sig(*a, b"s")).collect();
        assert!(matches!(
            aggregate(&w, &sigs),
            Err(RelayError::InsufficientWitnesses)
        ));
        // One more signature tips it over
        let sigs: Vec<_> = members[..5].iter().map(|a| sig(*a, b"s")).collect();
        assert!(aggregate(&w, &sigs).is_ok());
    }

    #[test]
    fn test_inactive_witnesses_are_skipped() {
        let w = active(&[addr(1), addr(2), addr(3)]);
        let sigs = vec![
            sig(addr(1), b"sig-one"),
            sig(addr(9), b"sig-stranger"),
            sig(addr(2), b"sig-two"),
        ];
        let quorum = aggregate(&w, &sigs).unwrap();
        assert_eq!(quorum.signers, vec![addr(1), addr(2)]);
        assert!(!quorum.payload.windows(12).any(|w| w == b"sig-stranger"));
    }

    #[test]
    fn test_duplicate_witness_counts_once() {
        let w = active(&[addr(1), addr(2), addr(3)]);
        let sigs = vec![
            sig(addr(1), b"sig-one"),
            sig(addr(1), b"sig-one"),
            sig(addr(1), b"sig-one"),
        ];
        assert!(matches!(
            aggregate(&w, &sigs),
            Err(RelayError::InsufficientWitnesses)
        ));
    }

    #[test]
    fn test_empty_witness_set_never_passes() {
        let w = active(&[]);
        assert!(matches!(
            aggregate(&w, &[]),
            Err(RelayError::InsufficientWitnesses)
        ));
        let sigs = vec![sig(addr(1), b"sig-one")];
        assert!(matches!(
            aggregate(&w, &sigs),
            Err(RelayError::InsufficientWitnesses)
        ));
    }

    proptest! {
        /// Acceptance is exactly `3·|S ∩ W| > 2·|W|`.
        #[test]
        fn prop_acceptance_matches_rule(
            witness_count in 1usize..40,
            signer_count in 0usize..40,
        ) {
            let members: Vec<Address> =
                (0..witness_count).map(|i| addr(i as u8 + 1)).collect();
            let w = active(&members);
            let signer_count = signer_count.min(witness_count);
            let sigs: Vec<_> = members[..signer_count]
                .iter()
                .map(|a| sig(*a, &[a.0[0]; 65]))
                .collect();
            let result = aggregate(&w, &sigs);
            if signer_count * 3 > witness_count * 2 {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(matches!(result, Err(RelayError::InsufficientWitnesses)));
            }
        }

        /// The payload is the address-ordered concatenation of the accepted
        /// signatures, regardless of arrival order.
        #[test]
        fn prop_payload_is_sorted_concatenation(
            mut order in Just((0u8..12).collect::<Vec<u8>>()).prop_shuffle(),
        ) {
            order.truncate(10);
            let members: Vec<Address> = (0..12).map(|i| addr(i + 1)).collect();
            let w = active(&members);
            let sigs: Vec<_> = order
                .iter()
                .map(|i| sig(members[*i as usize], &[*i; 65]))
                .collect();
            let quorum = aggregate(&w, &sigs).unwrap();

            let mut sorted = quorum.signers.clone();
            sorted.sort();
            prop_assert_eq!(&sorted, &quorum.signers, "signers must be ordered");

            let expected: Vec<u8> = quorum
                .signers
                .iter()
                .flat_map(|a| vec![a.0[0] - 1; 65])
                .collect();
            prop_assert_eq!(quorum.payload, expected);
        }
    }
}
