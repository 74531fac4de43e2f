//! Property tests over counters, limits, fees and forging

mod common;

use common::*;
use proptest::prelude::*;

use tezos_pipeline::config::FeeConfig;
use tezos_pipeline::encoding::{blake2b_256, Address};
use tezos_pipeline::pipeline::estimate::{minimal_fee_mutez, OpSize};
use tezos_pipeline::pipeline::forge::{forge_operation, signing_digest};
use tezos_pipeline::pipeline::prepare::default_limits;
use tezos_pipeline::pipeline::{OperationPipeline, PrepareOptions};
use tezos_pipeline::types::{
    tez_to_mutez, Limits, ManagerFields, OperationContent, OperationIntent, ProtocolConstants,
    TransactionContent, TransactionIntent,
};

fn constants(per_operation: u64, per_block: u64) -> ProtocolConstants {
    ProtocolConstants {
        hard_gas_limit_per_operation: per_operation,
        hard_gas_limit_per_block: per_block,
        hard_storage_limit_per_operation: 60_000,
        cost_per_byte: 250,
        origination_size: 257,
        minimal_block_delay: 8,
        blocks_per_cycle: 10_800,
    }
}

fn transfer_content(counter: u64, amount: u64, fee: u64) -> OperationContent {
    OperationContent::Transaction(TransactionContent {
        manager: ManagerFields {
            source: Address::parse(BOB).unwrap(),
            fee,
            counter,
            gas_limit: 1_040_000,
            storage_limit: 60_000,
        },
        amount,
        destination: Address::parse(CAROL).unwrap(),
        parameters: None,
    })
}

proptest! {
    #[test]
    fn prop_default_gas_within_both_caps(
        per_operation in 1u64..5_000_000,
        per_block in 1u64..50_000_000,
        intents in 1usize..200,
    ) {
        let limits = default_limits(&constants(per_operation, per_block), intents);
        prop_assert!(limits.gas_limit <= per_operation);
        prop_assert!(limits.gas_limit * (intents as u64 + 1) <= per_block);
        prop_assert_eq!(limits.fee, 0);
    }

    #[test]
    fn prop_fee_grows_with_gas_and_size(
        gas in 0u64..2_000_000,
        extra_gas in 0u64..100_000,
        bytes in 0u64..40_000,
        extra_bytes in 0u64..1_000,
        share in 1u64..20,
    ) {
        let fees = FeeConfig::default();
        let base = minimal_fee_mutez(gas, OpSize::new(bytes, share), &fees);
        prop_assert!(base >= fees.minimal_fee_mutez);
        prop_assert!(minimal_fee_mutez(gas + extra_gas, OpSize::new(bytes, share), &fees) >= base);
        prop_assert!(minimal_fee_mutez(gas, OpSize::new(bytes + extra_bytes, share), &fees) >= base);
    }

    #[test]
    fn prop_fee_margin_is_added_verbatim(gas in 0u64..1_000_000, bytes in 0u64..10_000, margin in 0u64..10_000) {
        let plain = FeeConfig::default();
        let padded = FeeConfig { fee_margin_mutez: margin, ..FeeConfig::default() };
        let size = OpSize::new(bytes, 1);
        prop_assert_eq!(
            minimal_fee_mutez(gas, size, &padded),
            minimal_fee_mutez(gas, size, &plain) + margin
        );
    }

    #[test]
    fn prop_tez_decimal_to_mutez(whole in 0u64..10_000_000, micro in 0u64..1_000_000) {
        let text = format!("{}.{:06}", whole, micro);
        prop_assert_eq!(tez_to_mutez(&text).unwrap(), whole * 1_000_000 + micro);
        prop_assert_eq!(tez_to_mutez(&whole.to_string()).unwrap(), whole * 1_000_000);
    }

    #[test]
    fn prop_tez_rejects_sub_mutez_precision(whole in 0u64..1_000, digits in "[0-9]{7,12}") {
        let text = format!("{}.{}", whole, digits);
        prop_assert!(tez_to_mutez(&text).is_err());
    }

    #[test]
    fn prop_forging_is_deterministic(
        counter in 1u64..u64::MAX / 2,
        amount in 0u64..u64::MAX / 2,
        fee in 0u64..10_000_000,
    ) {
        let contents = vec![transfer_content(counter, amount, fee)];
        let first = forge_operation(BRANCH, &contents).unwrap();
        let second = forge_operation(BRANCH, &contents).unwrap();
        prop_assert_eq!(&first, &second);

        let mut watermarked = vec![0x03];
        watermarked.extend_from_slice(&first);
        prop_assert_eq!(signing_digest(&first), blake2b_256(&watermarked));

        let bumped = forge_operation(BRANCH, &[transfer_content(counter + 1, amount, fee)]).unwrap();
        prop_assert_ne!(signing_digest(&first), signing_digest(&bumped));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every source's contents take consecutive counters above its head
    #[test]
    fn prop_prepared_counters_are_gapless(
        picks in proptest::collection::vec(any::<bool>(), 1..12),
        alice_head in 0u64..1_000_000,
        bob_head in 0u64..1_000_000,
    ) {
        let node = shared(MockNode::new());
        node.account(ALICE, alice_head, Some(ALICE_PK));
        node.account(BOB, bob_head, Some(ALICE_PK));
        let pipeline = OperationPipeline::new(node.clone(), FeeConfig::default());

        let intents: Vec<OperationIntent> = picks
            .iter()
            .map(|&from_bob| {
                OperationIntent::Transaction(TransactionIntent {
                    source: Some(Address::parse(if from_bob { BOB } else { ALICE }).unwrap()),
                    destination: Address::parse(CAROL).unwrap(),
                    amount: 1,
                    parameters: None,
                    limits: Limits::default(),
                })
            })
            .collect();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let prepared = runtime
            .block_on(pipeline.prepare(&intents, &PrepareOptions::default()))
            .unwrap();

        let (mut next_alice, mut next_bob) = (alice_head, bob_head);
        for (content, &from_bob) in prepared.contents.iter().zip(&picks) {
            let counter = content.manager().unwrap().counter;
            let next = if from_bob { &mut next_bob } else { &mut next_alice };
            *next += 1;
            prop_assert_eq!(counter, *next);
        }
        prop_assert_eq!(prepared.contents.len(), picks.len());
    }
}
