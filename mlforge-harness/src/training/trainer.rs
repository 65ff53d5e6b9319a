//! The train/validate loop.
//!
//! Per epoch: one training pass over every training loader, one validation
//! pass over every evaluation loader, one scheduler step, one early-stopping
//! decision, then a conditional checkpoint save. Execution is synchronous
//! and single-threaded; batches arrive in strict sequential order.

use crate::builder::Builder;
use crate::data::{DataLoader, LoaderBinding};
use crate::error::HarnessError;
use crate::hooks::{ForwardHook, LogRecord, LoggerHook, MetricHook, PostForwardHook, SinkFlags};
use crate::loss::LossFn;
use crate::model::{Model, ModelOutput, group_by_decay};
use crate::optim::Optimizer;
use crate::sched::Scheduler;
use crate::training::checkpoint::CheckpointManager;
use crate::training::early_stopping::EarlyStopper;
use crate::training::metrics::{EpochAccumulator, RunHistory};
use crate::writers::{ConsoleWriter, JsonlWriter, WriterSet};
use mlforge_core::ExperimentConfig;
use mlforge_core::config::NonFinitePolicy;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// The optimizer steps on the batch that completes an accumulation window.
fn is_accumulation_boundary(batch_index: usize, accumulation: usize) -> bool {
    (batch_index + 1) % accumulation == 0
}

pub struct Trainer {
    config: ExperimentConfig,
    builder: Builder,
    working_dir: PathBuf,
    loaders: Vec<LoaderBinding>,
    model: Box<dyn Model>,
    loss_fn: Box<dyn LossFn>,
    forward_hook: Box<dyn ForwardHook>,
    post_forward_hook: Box<dyn PostForwardHook>,
    metric_fn: Box<dyn MetricHook>,
    logger_fn: Box<dyn LoggerHook>,
    optimizer: Box<dyn Optimizer>,
    writers: WriterSet,
    checkpoints: CheckpointManager,
    stopper: EarlyStopper,
    /// Cumulative trained batches across the whole run.
    global_step: usize,
}

impl Trainer {
    /// Build every configured component and prepare the run directory.
    /// Construction fails fast on any unresolved name or invalid params.
    pub fn new(config: ExperimentConfig, builder: Builder) -> Result<Self, HarnessError> {
        config.validate().map_err(HarnessError::Core)?;
        let working_dir = config.working_dir();

        let loaders = builder.build_dataloaders(&config)?;
        let model = builder.build_model(&config)?;
        let loss_fn = builder.build_loss_fn(&config)?;
        let forward_hook = builder.build_forward_hook(&config)?;
        let post_forward_hook = builder.build_post_forward_hook(&config)?;
        let metric_fn = builder.build_metric_fn(&config)?;
        let logger_fn = builder.build_logger_fn(&config)?;

        let no_decay = if config.train.no_bias_decay {
            group_by_decay(&*model).1
        } else {
            Vec::new()
        };
        let optimizer = builder.build_optimizer(&config, &no_decay)?;

        let checkpoints = CheckpointManager::new(&working_dir);
        std::fs::create_dir_all(checkpoints.checkpoint_dir())
            .map_err(|e| HarnessError::storage(format!("cannot prepare run directory: {e}")))?;

        let flags = SinkFlags::from_params(&config.logger_hook.params)?;
        let mut writers = WriterSet::default();
        if flags.use_events_file {
            writers.push(Box::new(JsonlWriter::create(&working_dir)?));
        }
        if flags.use_console {
            writers.push(Box::new(ConsoleWriter));
        }

        let es = &config.train.early_stopping;
        let stopper = EarlyStopper::new(es.mode, es.patience);

        info!(
            run = %config.train.name,
            dir = %working_dir.display(),
            "Trainer assembled"
        );
        Ok(Self {
            config,
            builder,
            working_dir,
            loaders,
            model,
            loss_fn,
            forward_hook,
            post_forward_hook,
            metric_fn,
            logger_fn,
            optimizer,
            writers,
            checkpoints,
            stopper,
            global_step: 0,
        })
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Resume from the latest checkpoint if one exists, then drive epochs
    /// until the configured count or an early stop.
    pub fn run(&mut self) -> Result<RunHistory, HarnessError> {
        let mut last_epoch: i64 = -1;
        if let Some(epoch) = self.checkpoints.latest()? {
            let restored =
                self.checkpoints
                    .load(&mut *self.model, &mut *self.optimizer, epoch)?;
            self.stopper.restore(&restored.early_stopping);
            self.global_step = restored.step;
            last_epoch = restored.epoch as i64;
            info!(epoch, score = restored.score, "Resuming from checkpoint");
        }

        let mut scheduler = self.builder.build_scheduler(&self.config, last_epoch)?;

        let mut loaders = std::mem::take(&mut self.loaders);
        let start = Instant::now();
        let result = self.run_epochs(&mut loaders, &mut *scheduler, last_epoch);
        self.loaders = loaders;

        let mut history = result?;
        history.total_training_time_secs = start.elapsed().as_secs_f64();
        self.writers.flush()?;
        Ok(history)
    }

    fn run_epochs(
        &mut self,
        loaders: &mut [LoaderBinding],
        scheduler: &mut dyn Scheduler,
        last_epoch: i64,
    ) -> Result<RunHistory, HarnessError> {
        let mut history = RunHistory::default();
        let first_epoch = (last_epoch + 1) as usize;

        for epoch in first_epoch..self.config.train.num_epochs {
            for binding in loaders.iter_mut().filter(|b| b.is_train) {
                self.train_single_epoch(&mut binding.loader, epoch)?;
            }
            let mut epoch_score = None;
            for binding in loaders.iter_mut().filter(|b| !b.is_train) {
                epoch_score = Some(self.evaluate_single_epoch(&mut binding.loader, epoch)?);
            }

            scheduler.step(&mut *self.optimizer);

            let Some(score) = epoch_score else {
                warn!(epoch, "No validation score; skipping checkpoint decision");
                continue;
            };
            history.record_epoch(epoch, score, self.config.train.early_stopping.mode);

            let decision = self.stopper.decide(score);
            if decision.save_checkpoint {
                self.checkpoints.save(
                    &*self.model,
                    &*self.optimizer,
                    epoch,
                    self.global_step,
                    score,
                    self.stopper.snapshot(),
                    self.config.train.keep_checkpoints,
                )?;
            }
            if decision.stop_early {
                info!(epoch, score, "Early stopping");
                history.stopped_early = true;
                break;
            }
        }
        Ok(history)
    }

    fn train_single_epoch(
        &mut self,
        loader: &mut DataLoader,
        epoch: usize,
    ) -> Result<(), HarnessError> {
        self.model.set_train_mode(true);
        let accumulation = self.config.train.gradient_accumulation_step.unwrap_or(1);
        let num_steps = loader.num_batches();

        // Discard any partial accumulation window left by the previous epoch.
        self.optimizer.zero_grad(&mut *self.model);

        for (i, batch) in loader.batches()?.into_iter().enumerate() {
            let output = self.forward_hook.run(&*self.model, &batch, true)?;
            let output = self.post_forward_hook.run(output, &batch, true)?;
            let loss_out = self.loss_fn.compute(&output, &batch)?;

            if !loss_out.loss.is_finite() {
                match self.config.train.on_non_finite_loss {
                    NonFinitePolicy::Fatal => {
                        return Err(HarnessError::NonFiniteLoss { epoch, step: i });
                    }
                    NonFinitePolicy::Skip => {
                        warn!(epoch, step = i, "Skipping batch with non-finite loss");
                        continue;
                    }
                }
            }

            if let Some(grads) = &loss_out.logit_grads {
                self.model.backward(&batch, grads)?;
            }
            if is_accumulation_boundary(i, accumulation) {
                self.optimizer.step(&mut *self.model)?;
                self.optimizer.zero_grad(&mut *self.model);
            }
            self.global_step += 1;

            let metrics = self.metric_fn.compute(&output, &batch, true)?;
            self.check_score_contract(&metrics)?;

            let mut scalars = loss_out.scalars();
            scalars.insert("lr".to_string(), self.optimizer.learning_rate());
            scalars.extend(metrics);
            scalars.insert("epoch".to_string(), epoch as f64);

            let record = LogRecord {
                split: "train".to_string(),
                epoch,
                step: Some(i),
                num_steps_in_epoch: Some(num_steps),
                scalars,
            };
            self.logger_fn.log(&mut self.writers, &record)?;
        }
        Ok(())
    }

    /// One validation pass. Returns the epoch's `avg_score`, the quantity
    /// early stopping monitors. Read-only with respect to model and
    /// optimizer state.
    fn evaluate_single_epoch(
        &mut self,
        loader: &mut DataLoader,
        epoch: usize,
    ) -> Result<f64, HarnessError> {
        self.model.set_train_mode(false);
        let num_steps = loader.num_batches();
        let mut accumulator = EpochAccumulator::new();

        for (i, batch) in loader.batches()?.into_iter().enumerate() {
            let output = self.forward_hook.run(&*self.model, &batch, false)?;
            let output = self.post_forward_hook.run(output, &batch, false)?;
            let loss_out = self.loss_fn.compute(&output, &batch)?;

            if !loss_out.loss.is_finite() {
                match self.config.train.on_non_finite_loss {
                    NonFinitePolicy::Fatal => {
                        return Err(HarnessError::NonFiniteLoss { epoch, step: i });
                    }
                    NonFinitePolicy::Skip => {
                        warn!(epoch, step = i, "Skipping batch with non-finite loss");
                        continue;
                    }
                }
            }

            let metrics = self.metric_fn.compute(&output, &batch, false)?;
            self.check_score_contract(&metrics)?;

            let mut scalars = loss_out.scalars();
            scalars.insert("lr".to_string(), self.optimizer.learning_rate());
            scalars.extend(metrics);
            accumulator.push(&scalars);

            let record = LogRecord {
                split: "val".to_string(),
                epoch,
                step: Some(i),
                num_steps_in_epoch: Some(num_steps),
                scalars,
            };
            self.logger_fn.log(&mut self.writers, &record)?;
        }

        let averages = accumulator.averages();
        let score = *averages.get("avg_score").ok_or_else(|| {
            HarnessError::hook_contract("validation epoch produced no avg_score")
        })?;

        let record = LogRecord {
            split: "val".to_string(),
            epoch,
            step: None,
            num_steps_in_epoch: None,
            scalars: averages,
        };
        self.logger_fn.log(&mut self.writers, &record)?;
        Ok(score)
    }

    /// Run one validation pass over every evaluation loader without
    /// training. Returns the last loader's `avg_score`, or `None` when no
    /// evaluation split is configured.
    pub fn evaluate(&mut self) -> Result<Option<f64>, HarnessError> {
        let mut loaders = std::mem::take(&mut self.loaders);
        let mut score = None;
        let mut result = Ok(());
        for binding in loaders.iter_mut().filter(|b| !b.is_train) {
            match self.evaluate_single_epoch(&mut binding.loader, 0) {
                Ok(s) => score = Some(s),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.loaders = loaders;
        result.map(|_| score)
    }

    /// Inference pass: raw post-forward outputs over the first evaluation
    /// loader, concatenated in dataset order. No metrics, no logging.
    pub fn forward(&mut self) -> Result<ModelOutput, HarnessError> {
        self.model.set_train_mode(false);
        let mut loaders = std::mem::take(&mut self.loaders);
        let result = (|| {
            let binding = loaders
                .iter_mut()
                .find(|b| !b.is_train)
                .ok_or_else(|| HarnessError::training("no evaluation split configured"))?;
            let mut all = ModelOutput::default();
            for batch in binding.loader.batches()? {
                let output = self.forward_hook.run(&*self.model, &batch, false)?;
                let output = self.post_forward_hook.run(output, &batch, false)?;
                all.logits.extend(output.logits);
            }
            Ok(all)
        })();
        self.loaders = loaders;
        result
    }

    fn check_score_contract(&self, metrics: &BTreeMap<String, f64>) -> Result<(), HarnessError> {
        if !metrics.contains_key("score") {
            return Err(HarnessError::hook_contract(
                "metric hook returned no 'score' key",
            ));
        }
        Ok(())
    }
}
