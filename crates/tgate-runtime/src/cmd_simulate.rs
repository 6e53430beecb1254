use std::path::Path;
use std::rc::Rc;

use tgate_core::SettingsStore;
use tgate_runtime::{FileSettings, Scenario, run_scenario};

/// Replay a scenario and print the result. Returns the number of failed
/// expectations.
pub async fn cmd_simulate(
    path: &Path,
    settings: Option<&Path>,
    json: bool,
) -> anyhow::Result<usize> {
    let scenario = Scenario::load(path)?;
    let store = settings.map(|p| Rc::new(FileSettings::new(p)) as Rc<dyn SettingsStore>);

    // Virtual time: the replay finishes as fast as the host allows.
    tokio::time::pause();
    let (outcome, persisted) = run_scenario(&scenario, store).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "{}: {} turns, keep {}, top {}px, {} reloads, shield {}, {} tuning passes",
            scenario.name,
            outcome.turns,
            outcome.softcap_keep,
            outcome.top_px,
            outcome.reloads,
            outcome.shield,
            outcome.tune_passes,
        );
        for (name, count) in &outcome.totals {
            println!("  {name}: {count}");
        }
    }

    let failures = scenario.expect.check(&outcome, &persisted);
    for failure in &failures {
        eprintln!("FAIL {failure}");
    }
    Ok(failures.len())
}
