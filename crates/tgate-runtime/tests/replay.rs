use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use tgate_core::{Settings, SettingsStore};
use tgate_runtime::{FileSettings, Scenario, run_scenario};

fn scenarios_dir() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest.join("../../fixtures/scenarios")
}

fn load_scenarios() -> Vec<(PathBuf, Scenario)> {
    let dir = scenarios_dir();
    let mut scenarios = Vec::new();
    if !dir.exists() {
        return scenarios;
    }
    for entry in fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let scenario = Scenario::load(&path).unwrap_or_else(|e| panic!("{e}"));
            scenarios.push((path, scenario));
        }
    }
    scenarios.sort_by(|a, b| a.0.cmp(&b.0));
    scenarios
}

fn load(name: &str) -> Scenario {
    Scenario::load(&scenarios_dir().join(name)).unwrap_or_else(|e| panic!("{e}"))
}

#[tokio::test(start_paused = true)]
async fn test_all_scenarios() {
    let scenarios = load_scenarios();
    assert!(
        !scenarios.is_empty(),
        "no scenarios found in {:?}",
        scenarios_dir()
    );

    let mut failures = Vec::new();
    for (path, scenario) in &scenarios {
        let (outcome, persisted) = run_scenario(scenario, None)
            .await
            .unwrap_or_else(|e| panic!("{path:?}: {e}"));
        for failure in scenario.expect.check(&outcome, &persisted) {
            failures.push(format!("{}: {failure}", scenario.name));
        }
    }
    assert!(failures.is_empty(), "scenario failures:\n{}", failures.join("\n"));
}

#[tokio::test(start_paused = true)]
async fn replay_is_deterministic() {
    let scenario = load("disconnect_recovery.json");
    let (first, _) = run_scenario(&scenario, None).await.unwrap();
    let (second, _) = run_scenario(&scenario, None).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn early_shield_times_out_without_turns() {
    let scenario = load("keepalive_endpoint.json");
    let (outcome, _) = run_scenario(&scenario, None).await.unwrap();
    assert_eq!(outcome.shield, "timeout");
    assert_eq!(outcome.turns, 0);
}

#[tokio::test(start_paused = true)]
async fn gate_toggle_persists_to_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Rc::new(FileSettings::new(dir.path().join("settings.json")));
    store.save(&Settings::default()).unwrap();

    let scenario = load("history_blocking.json");
    let (outcome, persisted) = run_scenario(&scenario, Some(store.clone() as Rc<dyn SettingsStore>))
        .await
        .unwrap();
    assert!(!outcome.gate_enabled);
    assert!(!persisted.block_history);
    assert!(!store.load().unwrap().block_history);
}

#[tokio::test(start_paused = true)]
async fn disabled_blocking_from_settings_file_lets_history_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = Rc::new(FileSettings::new(dir.path().join("settings.json")));
    store
        .save(&Settings {
            block_history: false,
            ..Settings::default()
        })
        .unwrap();

    let scenario = load("history_blocking.json");
    let (outcome, _) = run_scenario(&scenario, Some(store as Rc<dyn SettingsStore>)).await.unwrap();
    assert_eq!(outcome.totals.get("historyCancel"), None);
}
