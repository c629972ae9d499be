//! Reference worker process: doubles every field of every item.

use anyhow::ensure;
use skewer::predictor::OfflinePredictor;

struct Doubler;

impl OfflinePredictor for Doubler {
    type Input = Vec<i64>;
    type Output = Vec<i64>;

    fn predict(&mut self, input: Vec<i64>) -> anyhow::Result<Vec<i64>> {
        ensure!(!input.is_empty(), "empty item");
        Ok(input.iter().map(|x| x * 2).collect())
    }

    fn describe(&self) -> String {
        "doubling predictor".to_string()
    }
}

fn main() -> anyhow::Result<()> {
    skewer::process::run_worker_main(|_index| Ok(Doubler))?;
    Ok(())
}
