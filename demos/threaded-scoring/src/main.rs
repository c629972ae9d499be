use std::sync::Arc;
use std::thread;
use std::time::Duration;
use skewer::batch::{Batch, BatchOutput, OutputColumn};
use skewer::config::DispatcherConfig;
use skewer::predictor::Predictor;
use skewer::{Batcher, Dispatcher, Prediction};
use tracing::info;

/// Stands in for an accelerator call: a fixed cost per call plus a small cost
/// per item, so batching pays off.
struct SlowScorer {
    calls: usize,
}

impl Predictor for SlowScorer {
    type Field = f32;
    type Output = f32;

    fn predict(&mut self, batch: Batch<f32>) -> anyhow::Result<BatchOutput<f32>> {
        self.calls += 1;
        thread::sleep(Duration::from_millis(20) + Duration::from_millis(2) * batch.len() as u32);

        let features = batch.columns();
        let scores = features[0].iter().zip(&features[1]).map(|(a, b)| a * b).collect();
        let logits = features[0].iter().map(|a| a.tanh()).collect();
        Ok(BatchOutput::success(vec![
            OutputColumn::PerItem(scores),
            OutputColumn::PerItem(logits),
            OutputColumn::Shared(self.calls as f32),
        ])
        .with_diagnostics(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skewer=info,threaded_scoring=info".into()),
        )
        .init();

    let config = DispatcherConfig {
        batch_size: 8,
        queue_multiplier: 16,
        debug_charts: true,
        send_every: 10,
        ..Default::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(
        vec![SlowScorer { calls: 0 }, SlowScorer { calls: 0 }],
        config,
    )?);
    dispatcher.start()?;

    let tasks = (0..200)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let x = i as f32 / 10.0;
                let handle = dispatcher.submit_async(vec![x, 2.0]).await?;
                anyhow::Ok((i, handle.await))
            })
        })
        .collect::<Vec<_>>();

    let mut failed = 0;
    for joined in futures::future::join_all(tasks).await {
        match joined?? {
            (_, Prediction::Success(fields)) if fields.len() == 3 => {}
            (i, prediction) => {
                failed += 1;
                info!(item = i, ?prediction, "item failed");
            }
        }
    }

    let stats = tokio::task::spawn_blocking(move || dispatcher.stop()).await??;
    for (worker, stats) in stats.iter().enumerate() {
        info!(
            worker,
            batches = stats.batches,
            items = stats.items,
            mean_batch = stats.items as f64 / stats.batches.max(1) as f64,
            "worker summary"
        );
    }
    info!(failed, "done");
    Ok(())
}
