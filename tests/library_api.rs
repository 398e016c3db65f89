/*
 * library_api.rs
 *
 * integration-style tests exercising maxtime as a library.
 *
 * goal: ensure the public API is usable without shelling out to the CLI.
 */

use std::time::{Duration, Instant};

use maxtime::error::{MaxtimeError, exit_codes};
use maxtime::outcome::Outcome;
use maxtime::process::ChildState;
use maxtime::runner::{GRACE_INTERVAL, RunConfig, RunResult, run_command};
use maxtime::signal::SignalTarget;
use maxtime::{Cli, args};

fn sh(timeout: Duration, script: &str) -> RunConfig {
    RunConfig {
        timeout,
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        ..RunConfig::default()
    }
}

/* =========================================================================
 * BASIC COMMAND EXECUTION
 * ========================================================================= */

#[test]
fn library_run_command_completes() {
    let result = run_command(&sh(Duration::from_secs(2), "exit 0")).expect("run should succeed");

    match result {
        RunResult::Completed { state, .. } => assert_eq!(state, ChildState::Exited(0)),
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[test]
fn library_run_command_nonzero_exit() {
    let result = run_command(&sh(Duration::from_secs(2), "exit 42")).unwrap();
    assert_eq!(result.outcome(), Outcome::Completed(42));
    assert_eq!(result.exit_code(), 42);
    assert!(result.pid() > 0);
}

#[test]
fn library_ambiguous_exit_code_is_passed_through() {
    /* the command's 105 is indistinguishable from ours, but it is still its code */
    let result = run_command(&sh(Duration::from_secs(2), "exit 105")).unwrap();
    assert_eq!(result.exit_code(), 105);
    assert!(result.outcome().is_ambiguous());
}

/* =========================================================================
 * TIMEOUTS
 * ========================================================================= */

#[test]
fn library_timeout_without_wait_returns_promptly() {
    let config = RunConfig {
        timeout: Duration::from_millis(100),
        command: "sleep".to_string(),
        args: vec!["10".to_string()],
        ..RunConfig::default()
    };

    let start = Instant::now();
    let result = run_command(&config).unwrap();

    match &result {
        RunResult::TimedOut { escalation, .. } => {
            assert!(escalation.term_delivered);
            assert!(!escalation.kill_sent);
            assert!(matches!(escalation.target, SignalTarget::Process(_)));
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
    assert_eq!(result.exit_code(), exit_codes::TERMINATED);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn library_group_kill_with_wait() {
    let config = RunConfig {
        use_process_group: true,
        force_kill: true,
        wait_for_child: true,
        ..sh(Duration::from_millis(200), "trap '' TERM; sleep 10")
    };

    let result = run_command(&config).unwrap();
    match &result {
        RunResult::TimedOut {
            pid,
            escalation,
            state,
            elapsed,
        } => {
            assert_eq!(escalation.target, SignalTarget::Group(*pid));
            assert!(escalation.kill_sent);
            assert_eq!(*state, Some(ChildState::Signaled(libc::SIGKILL)));
            assert!(*elapsed >= Duration::from_millis(200) + GRACE_INTERVAL);
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
    assert_eq!(result.exit_code(), 106);
}

#[test]
fn library_timeout_wins_over_late_clean_exit() {
    /* TERM handler exits 0, but the deadline already decided the answer */
    let config = RunConfig {
        wait_for_child: true,
        ..sh(Duration::from_millis(100), "trap 'exit 0' TERM; while :; do sleep 0.05; done")
    };

    let result = run_command(&config).unwrap();
    assert!(matches!(result, RunResult::TimedOut { .. }));
    assert_eq!(result.exit_code(), 106);
}

#[test]
fn library_repeated_runs_do_not_interfere() {
    for code in [0, 3, 9] {
        let result = run_command(&sh(Duration::from_secs(2), &format!("exit {code}"))).unwrap();
        assert_eq!(i32::from(result.exit_code()), code);
    }
}

/* =========================================================================
 * ERRORS
 * ========================================================================= */

#[test]
fn library_exec_failure() {
    let config = RunConfig {
        command: "nonexistent_command_xyz_12345".to_string(),
        ..RunConfig::default()
    };
    let err = run_command(&config).unwrap_err();
    assert!(matches!(err, MaxtimeError::Spawn(_)));
    assert_eq!(err.exit_code(), exit_codes::EXEC_FAILED);
}

#[test]
fn library_config_from_cli() {
    let Cli::Run(parsed) = args::parse_from(["maxtime", "-k", "0.5", "true"]).unwrap() else {
        panic!("expected a run request");
    };
    let config = RunConfig::from_args(&parsed).unwrap();
    assert_eq!(config.timeout, Duration::from_millis(500));
    assert!(config.force_kill);
    assert_eq!(run_command(&config).unwrap().exit_code(), 0);
}

#[test]
fn library_config_errors() {
    let Cli::Run(parsed) = args::parse_from(["maxtime", "0", "true"]).unwrap() else {
        panic!("expected a run request");
    };
    assert_eq!(
        RunConfig::from_args(&parsed).unwrap_err().exit_code(),
        exit_codes::NON_POSITIVE_TIMEOUT
    );
}
