//! The scriptable `Test` action kind used by `tests/scenarios.rs`. Mirrors
//! the original's `TestActionBasic`: counts ticks up to `iterate_count`, then
//! resolves with `result_code` (0 = success, any other value = a failure
//! with that `errorNumber`), optionally spawning a pre- or post-action of the
//! same kind first.

use maintenance_engine::{ActionImpl, Outcome};
use maintenance_types::{ActionDescription, MaintenanceError};

fn parse_u64(description: &ActionDescription, key: &str, default: u64) -> u64 {
    description.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn result_for(code: u64) -> maintenance_types::Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(MaintenanceError::Coded { code: code as i32, message: format!("Test action result_code {code}") })
    }
}

pub struct Test {
    remaining: u64,
    result_code: u64,
    pre_action: Option<ActionDescription>,
    post_action: Option<ActionDescription>,
    /// Held once, on the very first tick, so a test can saturate a worker
    /// for a bounded window (e.g. to prove a fast-track worker stays free).
    sleep: std::time::Duration,
}

impl Test {
    pub fn new(description: &ActionDescription) -> maintenance_types::Result<Self> {
        let iterate_count = parse_u64(description, "iterate_count", 0);
        let result_code = parse_u64(description, "result_code", 0);
        let sleep = std::time::Duration::from_millis(parse_u64(description, "sleep_ms", 0));

        let pre_action = description.get("preaction_result_code").map(|code| {
            ActionDescription::new(maintenance_types::kinds::TEST, description.priority())
                .with("iterate_count", "100")
                .with("result_code", code)
        });
        let post_action = description.get("postaction_result_code").map(|code| {
            ActionDescription::new(maintenance_types::kinds::TEST, description.priority())
                .with("iterate_count", "100")
                .with("result_code", code)
        });

        Ok(Test { remaining: iterate_count, result_code, pre_action, post_action, sleep })
    }
}

impl ActionImpl for Test {
    fn first(&mut self) -> Outcome {
        if !self.sleep.is_zero() {
            std::thread::sleep(std::mem::take(&mut self.sleep));
        }
        if let Some(pre) = self.pre_action.take() {
            return Outcome::more().with_pre_action(pre);
        }
        self.tick()
    }

    fn next(&mut self) -> Outcome {
        self.tick()
    }

    // `next()` delegates to the same counting logic as `first()` so the
    // pre-action branch only ever fires once, on the very first tick.
}

impl Test {
    fn tick(&mut self) -> Outcome {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Outcome::more();
        }
        match result_for(self.result_code) {
            Ok(()) => {
                let mut outcome = Outcome::done();
                if let Some(post) = self.post_action.take() {
                    outcome = outcome.with_post_action(post);
                }
                outcome
            }
            Err(e) => Outcome::failed(e),
        }
    }
}
