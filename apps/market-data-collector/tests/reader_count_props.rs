//! Reader Count Property Tests
//!
//! Arbitrary acquire/release sequences: the count tracks the running
//! balance floored at zero and never wraps.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use tempfile::TempDir;

use common::{FakeFactory, FakeSource, config};
use market_data_collector::{DataKind, RuntimeController, RuntimeState};

#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire,
    Release,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Acquire), Just(Op::Release)]
}

fn counting_controller(dir: &TempDir) -> RuntimeController {
    let mut cfg = config(dir.path(), &[DataKind::Ticker]);
    cfg.runtime.auto_activate = false;
    RuntimeController::new(cfg, FakeFactory::new(FakeSource::new()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn count_is_floored_balance(ops in prop::collection::vec(op(), 0..64)) {
        let dir = TempDir::new().unwrap();
        let controller = counting_controller(&dir);

        let mut expected = 0_usize;
        for op in ops {
            let reported = match op {
                Op::Acquire => {
                    expected += 1;
                    controller.acquire()
                }
                Op::Release => {
                    expected = expected.saturating_sub(1);
                    controller.release()
                }
            };
            prop_assert_eq!(reported, expected);
            prop_assert_eq!(controller.reader_count(), expected);
        }
        prop_assert_eq!(controller.state(), RuntimeState::Stopped);
    }

    #[test]
    fn balanced_threads_return_to_zero(per_thread in 1_usize..50, threads in 1_usize..6) {
        let dir = TempDir::new().unwrap();
        let controller = Arc::new(counting_controller(&dir));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        controller.acquire();
                    }
                    for _ in 0..per_thread {
                        controller.release();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        prop_assert_eq!(controller.reader_count(), 0);
    }
}
