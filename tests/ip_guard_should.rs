use std::time::Duration;

use relay::server::services::ip_guard_services::{IpGuardConfig, IpGuardService};

fn guard(max_fails: u32, block: Duration) -> IpGuardService {
    IpGuardService::new(IpGuardConfig {
        fail_window: Duration::from_secs(60),
        max_fails,
        block_duration: block,
        sweep_interval: Duration::from_secs(60),
    })
}

#[test]
fn test_blocks_after_threshold() {
    let guard = guard(3, Duration::from_secs(60));

    guard.register_failed_attempt("1.2.3.4");
    guard.register_failed_attempt("1.2.3.4");
    assert!(!guard.is_blocked("1.2.3.4"));

    guard.register_failed_attempt("1.2.3.4");
    assert!(guard.is_blocked("1.2.3.4"));

    // neighbours are unaffected
    assert!(!guard.is_blocked("5.6.7.8"));
}

#[test]
fn test_success_forgives_earlier_failures() {
    let guard = guard(3, Duration::from_secs(60));

    guard.register_failed_attempt("1.2.3.4");
    guard.register_failed_attempt("1.2.3.4");
    guard.register_successful_auth("1.2.3.4");

    // counter restarted, two more fails stay under the threshold
    guard.register_failed_attempt("1.2.3.4");
    guard.register_failed_attempt("1.2.3.4");
    assert!(!guard.is_blocked("1.2.3.4"));
}

#[test]
fn test_success_does_not_lift_an_active_block() {
    let guard = guard(2, Duration::from_secs(60));

    guard.register_failed_attempt("1.2.3.4");
    guard.register_failed_attempt("1.2.3.4");
    assert!(guard.is_blocked("1.2.3.4"));

    // a later valid credential must still wait out the block
    guard.register_successful_auth("1.2.3.4");
    assert!(guard.is_blocked("1.2.3.4"));
}

#[test]
fn test_block_expires() {
    let guard = guard(2, Duration::from_millis(40));

    guard.register_failed_attempt("1.2.3.4");
    guard.register_failed_attempt("1.2.3.4");
    assert!(guard.is_blocked("1.2.3.4"));

    std::thread::sleep(Duration::from_millis(80));
    assert!(!guard.is_blocked("1.2.3.4"));
}

#[test]
fn test_sweep_drops_idle_records() {
    let guard = IpGuardService::new(IpGuardConfig {
        fail_window: Duration::from_millis(30),
        max_fails: 5,
        block_duration: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(60),
    });

    guard.register_failed_attempt("1.2.3.4");
    guard.register_failed_attempt("5.6.7.8");
    assert_eq!(guard.tracked_ips(), 2);

    std::thread::sleep(Duration::from_millis(60));
    guard.sweep();
    assert_eq!(guard.tracked_ips(), 0);
}

#[test]
fn test_old_failures_age_out_of_the_window() {
    let guard = IpGuardService::new(IpGuardConfig {
        fail_window: Duration::from_millis(40),
        max_fails: 3,
        block_duration: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(60),
    });

    guard.register_failed_attempt("1.2.3.4");
    guard.register_failed_attempt("1.2.3.4");
    std::thread::sleep(Duration::from_millis(80));

    // the first two slid out of the window, this one is a fresh count of one
    guard.register_failed_attempt("1.2.3.4");
    assert!(!guard.is_blocked("1.2.3.4"));
}
