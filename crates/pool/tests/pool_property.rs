//! Property tests for the pool count invariant.
//!
//! After every operation in an arbitrary acquire/release/add/remove
//! sequence, `resource_count == available + usage` and the usage count
//! matches the number of members actually held by the caller.

use std::sync::Arc;

use proptest::prelude::*;

use abacus_pool::pool::Pool;
use abacus_pool::testing::{CountingFactory, ManualClock};

#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire,
    Release,
    Add,
    Remove,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn count_invariant_survives_random_op_sequences(
        ops in proptest::collection::vec(
            prop_oneof![Just(Op::Acquire), Just(Op::Release), Just(Op::Add), Just(Op::Remove)],
            1..60,
        ),
    ) {
        // Run the async property on a current-thread Tokio runtime.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let clock = Arc::new(ManualClock::starting_now());
            let pool = Pool::new("prop", CountingFactory::new(clock));
            let mut held = Vec::new();

            for op in &ops {
                match op {
                    Op::Acquire => held.push(pool.acquire().await.unwrap()),
                    Op::Release => {
                        if let Some(member) = held.pop() {
                            pool.release(member);
                        }
                    }
                    Op::Add => pool.add_resource().await.unwrap(),
                    Op::Remove => pool.remove_resource(),
                }

                prop_assert_eq!(
                    pool.resource_count(),
                    pool.available_members().len() + pool.usage_count(),
                    "count invariant violated after {:?}",
                    op
                );
                prop_assert_eq!(
                    pool.usage_count(),
                    held.len(),
                    "usage count diverged from held members"
                );
            }
            Ok(())
        })?;
    }
}
