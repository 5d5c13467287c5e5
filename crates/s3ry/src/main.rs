mod cli;
mod format;
mod prompt;
mod shutdown;
mod terminal;
mod ui;

use std::io::IsTerminal as _;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser as _;
use tokio::sync::mpsc;

use s3ry_core::config::{self, Settings, UiMode};
use s3ry_core::error::ErrorKind;
use s3ry_core::messages::{Catalog, Operation};
use s3ry_engine::{
    Engine, EngineConfig, S3Store, S3StoreConfig, StoreError, TransferError, TransferSummary,
    UploadCandidate,
};

use crate::cli::Cli;
use crate::format::{human_bytes, human_duration};
use crate::shutdown::{
    CANCEL_EXIT_CODE, ShutdownController, ShutdownEvent, spawn_ctrl_c_handler,
};
use crate::terminal::{Screen, UiSignal};
use crate::ui::{LegacyBars, ProgressView, Tui};

fn init_tracing(level: config::LogLevel) {
    use tracing_subscriber::EnvFilter;

    let level = level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("s3ry={level},s3ry_engine={level},s3ry_core={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("s3ry: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let file = match config::load_config_file(cli.config.as_deref()) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("s3ry: {err:#}");
            return Ok(2);
        }
    };
    let mut settings = match Settings::resolve(
        file.as_ref(),
        |name| std::env::var(name).ok(),
        &cli.overrides(),
    ) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("s3ry: {err:#}");
            return Ok(2);
        }
    };
    // The legacy backend is the same engine pinned to one worker; results
    // are identical, execution is serial.
    if !cli.modern_backend {
        settings.workers = 1;
    }

    init_tracing(settings.log_level);
    let catalog = Catalog::new(settings.language);

    if !std::io::stdin().is_terminal() {
        eprintln!("s3ry: an interactive terminal is required");
        return Ok(2);
    }

    let store = S3Store::connect(S3StoreConfig {
        region: settings.region.clone(),
        profile: settings.profile.clone(),
        endpoint: settings.endpoint.clone(),
        access_key: None,
        secret_key: None,
        attempt_timeout: Duration::from_secs(30),
    })
    .await;

    let engine = Engine::new(
        Arc::new(store),
        EngineConfig {
            workers: settings.workers,
            part_size: settings.chunk_size,
            ..EngineConfig::default()
        },
    );
    tracing::info!(
        workers = engine.worker_count(),
        part_size = settings.chunk_size,
        "engine started"
    );

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let mut session = Session {
        engine: &engine,
        catalog: &catalog,
        ui_mode: settings.ui_mode,
        shutdown,
        shutdown_rx,
    };

    let code = session.run().await?;
    drop(session);
    if code == CANCEL_EXIT_CODE {
        // Cleanup already ran inside the cancelled operations; skip the
        // drain and get out of the user's way.
        return Ok(code);
    }

    engine.shutdown().await;
    Ok(code)
}

struct Session<'a> {
    engine: &'a Engine,
    catalog: &'a Catalog,
    ui_mode: UiMode,
    shutdown: Arc<ShutdownController>,
    shutdown_rx: mpsc::UnboundedReceiver<ShutdownEvent>,
}

impl Session<'_> {
    async fn run(&mut self) -> anyhow::Result<i32> {
        loop {
            let buckets = match self.drive(self.engine.list_buckets()).await {
                ControlFlow::Continue(Ok(buckets)) => buckets,
                ControlFlow::Continue(Err(err)) => {
                    return Ok(self.report_store_error(&err));
                }
                ControlFlow::Break(code) => return Ok(code),
            };
            if buckets.is_empty() {
                println!("{}", self.catalog.failure_message(ErrorKind::NotFound));
                return Ok(0);
            }

            let Ok(choice) = prompt::select_bucket(self.catalog, &buckets) else {
                return Ok(CANCEL_EXIT_CODE);
            };
            let Some(idx) = choice else { return Ok(0) };
            let bucket = buckets[idx].name.clone();

            loop {
                let Ok(choice) = prompt::select_operation(self.catalog) else {
                    return Ok(CANCEL_EXIT_CODE);
                };
                let Some(op) = choice else { break };

                match self.run_operation(&bucket, op).await? {
                    ControlFlow::Continue(()) => {}
                    ControlFlow::Break(code) => return Ok(code),
                }
            }
        }
    }

    async fn run_operation(
        &mut self,
        bucket: &str,
        op: Operation,
    ) -> anyhow::Result<ControlFlow<i32>> {
        match op {
            Operation::ListObjects => self.op_list(bucket).await,
            Operation::Download => self.op_download(bucket).await,
            Operation::Upload => self.op_upload(bucket).await,
            Operation::Delete => self.op_delete(bucket).await,
            Operation::ExportInventory => self.op_export(bucket).await,
        }
    }

    async fn op_list(&mut self, bucket: &str) -> anyhow::Result<ControlFlow<i32>> {
        let objects = match self.drive(self.engine.list_objects(bucket, None)).await {
            ControlFlow::Continue(Ok(objects)) => objects,
            ControlFlow::Continue(Err(err)) => {
                return Ok(ControlFlow::Break(self.report_store_error(&err)));
            }
            ControlFlow::Break(code) => return Ok(ControlFlow::Break(code)),
        };

        let total: u64 = objects.iter().map(|o| o.size).sum();
        for obj in &objects {
            println!(
                "{}  {:>10}  {}",
                obj.last_modified.format("%Y-%m-%d %H:%M:%S"),
                human_bytes(obj.size),
                obj.key
            );
        }
        println!("{} object(s), {}", objects.len(), human_bytes(total));
        Ok(ControlFlow::Continue(()))
    }

    async fn op_download(&mut self, bucket: &str) -> anyhow::Result<ControlFlow<i32>> {
        let objects = match self.drive(self.engine.list_objects(bucket, None)).await {
            ControlFlow::Continue(Ok(objects)) => objects,
            ControlFlow::Continue(Err(err)) => {
                return Ok(ControlFlow::Break(self.report_store_error(&err)));
            }
            ControlFlow::Break(code) => return Ok(ControlFlow::Break(code)),
        };
        if objects.is_empty() {
            println!("{}", self.catalog.failure_message(ErrorKind::NotFound));
            return Ok(ControlFlow::Continue(()));
        }

        let Ok(choice) = prompt::select_object(self.catalog, &objects) else {
            return Ok(ControlFlow::Break(CANCEL_EXIT_CODE));
        };
        let Some(idx) = choice else {
            return Ok(ControlFlow::Continue(()));
        };
        let key = objects[idx].key.clone();

        let dest = Engine::local_dest_for_key(&key);
        if dest.exists() {
            let Ok(overwrite) = prompt::confirm_overwrite(self.catalog, &dest.display().to_string())
            else {
                return Ok(ControlFlow::Break(CANCEL_EXIT_CODE));
            };
            if !overwrite {
                return Ok(ControlFlow::Continue(()));
            }
        }

        let started = Instant::now();
        match self.drive(self.engine.download(bucket, &key, &dest)).await {
            ControlFlow::Continue(Ok(summary)) => {
                println!(
                    "{} ({}, {})",
                    self.catalog.downloaded(&key, &dest.display().to_string()),
                    human_bytes(summary.bytes),
                    human_duration(started.elapsed())
                );
                Ok(ControlFlow::Continue(()))
            }
            ControlFlow::Continue(Err(err)) => {
                Ok(ControlFlow::Break(self.report_transfer_error(&err)))
            }
            ControlFlow::Break(code) => Ok(ControlFlow::Break(code)),
        }
    }

    async fn op_upload(&mut self, bucket: &str) -> anyhow::Result<ControlFlow<i32>> {
        let root = std::env::current_dir()?;
        let candidates = Engine::upload_candidates(&root)?;
        if candidates.is_empty() {
            println!("{}", self.catalog.failure_message(ErrorKind::NotFound));
            return Ok(ControlFlow::Continue(()));
        }

        let Ok(picked) = prompt::select_upload_candidates(self.catalog, &candidates) else {
            return Ok(ControlFlow::Break(CANCEL_EXIT_CODE));
        };
        if picked.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }
        let batch: Vec<UploadCandidate> = picked.iter().map(|&i| candidates[i].clone()).collect();

        // One view for the whole batch: files go up in turn, each file's
        // parts in parallel, and the dashboard stays on screen throughout.
        let engine = self.engine;
        let started = Instant::now();
        let upload_all = async {
            let mut done: Vec<(String, TransferSummary)> = Vec::new();
            for candidate in &batch {
                match engine.upload(bucket, &candidate.key, &candidate.path).await {
                    Ok(summary) => done.push((candidate.key.clone(), summary)),
                    Err(err) => return (done, Some(err)),
                }
            }
            (done, None)
        };

        match self.drive(upload_all).await {
            ControlFlow::Continue((done, failure)) => {
                for (key, summary) in &done {
                    println!(
                        "{} ({})",
                        self.catalog.uploaded(key),
                        human_bytes(summary.bytes)
                    );
                }
                if let Some(err) = failure {
                    return Ok(ControlFlow::Break(self.report_transfer_error(&err)));
                }
                if done.len() > 1 {
                    println!(
                        "{}",
                        self.catalog
                            .uploaded_many(done.len(), &human_duration(started.elapsed()))
                    );
                }
                Ok(ControlFlow::Continue(()))
            }
            ControlFlow::Break(code) => Ok(ControlFlow::Break(code)),
        }
    }

    async fn op_delete(&mut self, bucket: &str) -> anyhow::Result<ControlFlow<i32>> {
        let objects = match self.drive(self.engine.list_objects(bucket, None)).await {
            ControlFlow::Continue(Ok(objects)) => objects,
            ControlFlow::Continue(Err(err)) => {
                return Ok(ControlFlow::Break(self.report_store_error(&err)));
            }
            ControlFlow::Break(code) => return Ok(ControlFlow::Break(code)),
        };
        if objects.is_empty() {
            println!("{}", self.catalog.failure_message(ErrorKind::NotFound));
            return Ok(ControlFlow::Continue(()));
        }

        let Ok(picked) = prompt::select_objects_for_delete(self.catalog, &objects) else {
            return Ok(ControlFlow::Break(CANCEL_EXIT_CODE));
        };
        if picked.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }
        let keys: Vec<String> = picked.iter().map(|&i| objects[i].key.clone()).collect();

        match self.drive(self.engine.delete(bucket, &keys)).await {
            ControlFlow::Continue(Ok(count)) => {
                println!("{}", self.catalog.deleted(count));
                Ok(ControlFlow::Continue(()))
            }
            ControlFlow::Continue(Err(err)) => {
                Ok(ControlFlow::Break(self.report_transfer_error(&err)))
            }
            ControlFlow::Break(code) => Ok(ControlFlow::Break(code)),
        }
    }

    async fn op_export(&mut self, bucket: &str) -> anyhow::Result<ControlFlow<i32>> {
        let dest = std::path::PathBuf::from(Engine::default_inventory_filename(bucket));
        match self.drive(self.engine.export_inventory(bucket, &dest)).await {
            ControlFlow::Continue(Ok(count)) => {
                println!(
                    "{}",
                    self.catalog
                        .inventory_saved(&dest.display().to_string(), count)
                );
                Ok(ControlFlow::Continue(()))
            }
            ControlFlow::Continue(Err(err)) => {
                Ok(ControlFlow::Break(self.report_store_error(&err)))
            }
            ControlFlow::Break(code) => Ok(ControlFlow::Break(code)),
        }
    }

    /// Run one engine operation (or batch) while rendering progress and
    /// servicing cancel requests from either the signal handler or the
    /// dashboard's own input. Breaks with the exit code on an immediate
    /// shutdown.
    async fn drive<T>(&mut self, fut: impl Future<Output = T>) -> ControlFlow<i32, T> {
        let mut updates = self.engine.subscribe_progress();
        let (mut view, _screen, mut screen_signals) = self.make_view();
        let mut screen_live = screen_signals.is_some();

        tokio::pin!(fut);
        loop {
            tokio::select! {
                result = &mut fut => {
                    view.finish();
                    return ControlFlow::Continue(result);
                }
                update = updates.recv() => {
                    if let Ok(update) = update {
                        view.apply(&update);
                    }
                }
                signal = async { screen_signals.as_mut().expect("screen input").recv().await },
                    if screen_live =>
                {
                    match signal {
                        Some(UiSignal::Cancel) => {
                            self.engine.cancel_all();
                            view.set_status(self.catalog.stop_notice());
                        }
                        Some(UiSignal::Exit) => {
                            return ControlFlow::Break(CANCEL_EXIT_CODE);
                        }
                        Some(UiSignal::Resize) => view.refresh(),
                        None => screen_live = false,
                    }
                }
                event = self.shutdown_rx.recv() => {
                    match event {
                        Some(ShutdownEvent::Cancel) => {
                            self.engine.cancel_all();
                            view.set_status(self.catalog.stop_notice());
                        }
                        Some(ShutdownEvent::Exit) | None => {
                            return ControlFlow::Break(CANCEL_EXIT_CODE);
                        }
                    }
                }
            }
        }
    }

    fn make_view(
        &self,
    ) -> (
        ProgressView,
        Option<Screen>,
        Option<mpsc::UnboundedReceiver<UiSignal>>,
    ) {
        if self.ui_mode == UiMode::Bubbles {
            match Screen::enter(self.shutdown.clone()) {
                Ok((screen, signals)) => match Tui::new() {
                    Ok(tui) => {
                        return (ProgressView::Tui(Box::new(tui)), Some(screen), Some(signals));
                    }
                    Err(err) => {
                        drop(screen);
                        tracing::warn!(error = %err, "falling back to line-based progress");
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "falling back to line-based progress");
                }
            }
        }
        (ProgressView::Legacy(LegacyBars::new()), None, None)
    }

    fn report_store_error(&self, err: &StoreError) -> i32 {
        self.report(err.kind, &err.message)
    }

    fn report_transfer_error(&self, err: &TransferError) -> i32 {
        if !err.failed_parts.is_empty() {
            tracing::debug!(parts = ?err.failed_parts, "failed parts");
        }
        self.report(err.kind(), &err.first.message)
    }

    fn report(&self, kind: ErrorKind, detail: &str) -> i32 {
        if kind == ErrorKind::Cancelled {
            eprintln!("{}", self.catalog.cancelled());
            return CANCEL_EXIT_CODE;
        }
        let hint = self.catalog.failure_hint(kind);
        if hint.is_empty() {
            eprintln!("{}", self.catalog.failure_message(kind));
        } else {
            eprintln!("{} {}", self.catalog.failure_message(kind), hint);
        }
        tracing::error!(kind = %kind, detail, "operation failed");
        1
    }
}
