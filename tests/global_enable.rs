//! The process-wide session lives in a static, so it gets a test binary of its own.

use ble_session_bridge::infrastructure::bluetooth::sim::SimulatedStack;
use ble_session_bridge::{enable, Adapter, RadioState, Settings};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn enable_runs_once_for_every_caller() {
    let stack = SimulatedStack::new();

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let stack = stack.clone();
            tokio::spawn(async move { enable(Arc::new(stack), Settings::default()).await })
        })
        .collect();

    let mut adapters = Vec::new();
    for caller in callers {
        adapters.push(caller.await.unwrap().unwrap());
    }
    assert!(adapters.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(stack.init_calls(), 1);
    assert_eq!(stack.sessions_opened(), 1);

    // A later caller's stack is never touched.
    let other = SimulatedStack::new();
    let again = enable(Arc::new(other.clone()), Settings::default()).await.unwrap();
    assert!(Arc::ptr_eq(&again, &adapters[0]));
    assert_eq!(other.init_calls(), 0);

    assert_eq!(again.radio_state(), Ok(RadioState::Enabled));
}
