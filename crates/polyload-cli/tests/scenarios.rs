//! Scenario drivers run end to end on a development chain.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use polyload_cli::scenario::{ISSUED, LEG_AMOUNT};
use polyload_cli::{Cli, RunReport, Scenario, dev_chain, run};
use polyload_devchain::{DevChain, DevChainConfig, HOUSEKEEPING_EXTRINSICS};
use polyload_settlement::InstructionOutcome;
use polyload_submit::Signer;
use polyload_types::{ClientConfig, DrainConfig};

fn config(fast: bool) -> ClientConfig {
    ClientConfig {
        fast,
        drain: DrainConfig {
            housekeeping_extrinsics: HOUSEKEEPING_EXTRINSICS,
            timeout_ms: Some(10_000),
        },
        ..ClientConfig::default()
    }
}

fn setup(fast: bool, prepend: &str) -> (DevChain, Scenario) {
    let chain = dev_chain(DevChainConfig::every(Duration::from_millis(20)));
    let scenario = Scenario::new(Arc::new(chain.clone()), &config(fast), prepend);
    (chain, scenario)
}

#[tokio::test]
async fn settle_round_trip_and_rejection() {
    let (chain, scenario) = setup(false, "rt");
    let mut report = RunReport::new();
    let run = scenario.settle(&mut report).await.unwrap();

    assert!(report.passed(), "{report}");
    let outcomes: Vec<_> = run.outcomes.iter().map(|(_, o)| o.clone()).collect();
    assert_eq!(
        outcomes,
        vec![InstructionOutcome::Executed, InstructionOutcome::Rejected]
    );

    let ticker = run.tickers[0];
    let mut balances = Vec::new();
    for party in &run.parties {
        balances.push(chain.asset_balance(&party.portfolio(), &ticker).await);
    }
    assert_eq!(balances, vec![ISSUED - LEG_AMOUNT, LEG_AMOUNT, 0]);
}

#[tokio::test]
async fn settle_group_across_five_parties() {
    let (chain, scenario) = setup(false, "grp");
    let mut report = RunReport::new();
    let run = scenario.settle_group(&mut report).await.unwrap();

    assert!(report.passed(), "{report}");
    assert!(run.outcomes[0].1.is_executed());
    let [alpha, omega] = run.tickers[..] else {
        panic!("two assets expected");
    };
    let balances = |i: usize| {
        let pf = run.parties[i].portfolio();
        let chain = chain.clone();
        async move {
            (
                chain.asset_balance(&pf, &alpha).await,
                chain.asset_balance(&pf, &omega).await,
            )
        }
    };
    assert_eq!(balances(0).await, (999_600, 100));
    assert_eq!(balances(1).await, (100, 999_900));
    for i in 2..5 {
        assert_eq!(balances(i).await, (100, 0));
    }
}

#[tokio::test]
async fn onboard_joins_keys_and_adds_claims() {
    let (chain, scenario) = setup(false, "ob");
    let mut report = RunReport::new();
    let run = scenario.onboard(3, 4, &mut report).await.unwrap();

    assert!(report.passed(), "{report}");
    assert_eq!(run.identities.len(), 3);
    assert_eq!(run.joined_keys, 3);
    assert_eq!(run.claims, 12);
    for (i, signing) in Signer::dev_batch("obsigning", 3).iter().enumerate() {
        let master = Signer::dev(&format!("//obmaster_{i}"));
        let did = chain.identity_of(&master.account()).await;
        assert!(did.is_some());
        assert_eq!(chain.identity_of(&signing.account()).await, did);
    }
}

#[tokio::test]
async fn fast_transfer_waits_for_the_chain() {
    let (chain, scenario) = setup(true, "fast");
    let mut report = RunReport::new();
    let targets = scenario.transfer(10, 7, &mut report).await.unwrap();

    assert!(report.passed(), "{report}");
    assert!(report.steps.iter().any(|s| s.name == "drain" && s.passed == 1));
    assert!(report.blocks.signed_extrinsics >= 10);
    for target in &targets {
        assert_eq!(chain.free_balance(target).await, 7);
    }
}

#[tokio::test]
async fn repeated_prefix_aborts_the_scenario_not_the_run() {
    let (_chain, scenario) = setup(false, "dup");
    let mut first = RunReport::new();
    scenario.settle(&mut first).await.unwrap();
    assert!(first.passed(), "{first}");

    // Same keys again: registration is refused and the scenario stops.
    let mut second = RunReport::new();
    scenario
        .execute(&polyload_cli::Command::Settle, &mut second)
        .await;
    assert!(!second.passed());
    assert!(second.steps.iter().any(|s| s.name == "aborted" && s.failed == 1));
}

#[tokio::test]
async fn dev_flag_runs_a_full_scenario() {
    let cli = Cli::parse_from(["polyload", "--dev", "--endpoint", "ws://unused:1", "settle"]);
    let report = run(&cli).await.unwrap();
    assert!(report.passed(), "{report}");
    assert!(report.submissions.succeeded > 0);
}
