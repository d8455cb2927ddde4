//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::{AppConfig, MetricsBackend};
use crate::core::constants::{
    APP_NAME, APP_NAME_LOWER, ENV_LOG, TOPIC_ANNOTATION_EVENTS, TOPIC_SPAN_INGEST,
};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::DataStores;
use crate::data::topics::{Publisher, Topic, TopicService};
use crate::domain::evaluation::{ExperimentFilter, ExperimentRunner, ExperimentSvc};
use crate::domain::external::{
    Authorizer, ConfigBenefitOracle, ConfigTagCatalog, EchoTargetInvoker, EvaluatorInvoker,
    ExactMatchEvaluatorInvoker, HttpEvaluatorInvoker, HttpTargetInvoker,
    IdentityEvalTargetResolver, InMemoryDatasetService, LocalAuthorizer, LocalEvaluatorResolver,
    LocalUserResolver, TagCatalog, TargetInvoker,
};
use crate::domain::metrics::{Meter, MetricsEmitter, NoopMeter, OtelMeter, init_meter};
use crate::domain::observability::{
    AnnotationEvent, AnnotationEventConsumer, AnnotationSvc, DatasetExporter, Enricher,
    IngestConsumer, Ingestor, SpanBatch, TagResolver, TraceQuery, TtlPolicy, ViewSvc,
};
use crate::domain::pipeline::spawn_consumer;

/// Domain services shared by the HTTP surface
#[derive(Clone)]
pub struct Services {
    pub ingestor: Arc<Ingestor>,
    pub query: Arc<TraceQuery>,
    pub annotations: Arc<AnnotationSvc>,
    pub views: Arc<ViewSvc>,
    pub exporter: Arc<DatasetExporter>,
    pub experiments: Arc<ExperimentSvc>,
}

impl Services {
    /// Wire the domain services over the stores with the local collaborators
    pub fn new(
        config: &AppConfig,
        stores: &DataStores,
        annotation_events: Publisher<AnnotationEvent>,
        runner: Arc<ExperimentRunner>,
        metrics: MetricsEmitter,
    ) -> Self {
        let authorizer: Arc<dyn Authorizer> = Arc::new(LocalAuthorizer);
        let tags: Arc<dyn TagCatalog> = Arc::new(ConfigTagCatalog::new(config.tags.catalog.clone()));
        let enricher = Enricher::new(
            Arc::new(LocalUserResolver),
            Arc::new(LocalEvaluatorResolver),
            tags.clone(),
            metrics.clone(),
        );
        let ttl = TtlPolicy::new(Arc::new(ConfigBenefitOracle::new(config.benefit.clone())));

        let ingestor = Arc::new(Ingestor::new(
            stores.spans(),
            authorizer.clone(),
            ttl,
            config.trace.max_spans_per_workspace,
        ));
        let query = Arc::new(TraceQuery::new(
            stores.spans(),
            stores.annotations(),
            authorizer.clone(),
            enricher.clone(),
            config.trace.earliest_days,
            config.trace.default_page_size,
        ));
        let annotations = Arc::new(AnnotationSvc::new(
            stores.annotations(),
            stores.spans(),
            authorizer.clone(),
            TagResolver::new(tags),
            enricher,
            annotation_events,
        ));
        let views = Arc::new(ViewSvc::new(
            stores.views(),
            authorizer.clone(),
            config.views.system.clone(),
        ));
        let exporter = Arc::new(DatasetExporter::new(
            stores.spans(),
            Arc::new(InMemoryDatasetService::new()),
            authorizer.clone(),
        ));
        let experiments = Arc::new(ExperimentSvc::new(
            stores.experiments(),
            runner,
            ExperimentFilter::new(Arc::new(IdentityEvalTargetResolver)),
            authorizer,
            metrics,
        ));

        Self {
            ingestor,
            query,
            annotations,
            views,
            exporter,
            experiments,
        }
    }
}

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub stores: DataStores,
    pub ingest_topic: Topic<SpanBatch>,
    pub annotation_topic: Topic<AnnotationEvent>,
    pub runner: Arc<ExperimentRunner>,
    pub services: Services,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::System {
                command: system_cmd,
            }) => {
                return Self::handle_system_command(system_cmd);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init().await?;
        let stores = DataStores::init(&storage)
            .await
            .context("Failed to open data stores")?;

        Self::init_metrics(config.metrics.backend);
        let metrics = MetricsEmitter::global();

        let topics = Arc::new(TopicService::new());
        let ingest_topic = topics
            .topic::<SpanBatch>(TOPIC_SPAN_INGEST)
            .context("Failed to create span ingest topic")?;
        let annotation_topic = topics
            .topic::<AnnotationEvent>(TOPIC_ANNOTATION_EVENTS)
            .context("Failed to create annotation topic")?;

        let (target, evaluator) = Self::collaborators(&config)?;
        let runner = Arc::new(ExperimentRunner::new(
            stores.experiments(),
            target,
            evaluator,
            metrics.clone(),
            config.evaluation.clone(),
        ));
        let services = Services::new(
            &config,
            &stores,
            annotation_topic.publisher(),
            runner.clone(),
            metrics,
        );

        let shutdown = ShutdownService::new(topics, stores.clone(), runner.clone());

        Ok(Self {
            shutdown,
            config,
            storage,
            stores,
            ingest_topic,
            annotation_topic,
            runner,
            services,
        })
    }

    fn init_metrics(backend: MetricsBackend) {
        let meter: Arc<dyn Meter> = match backend {
            MetricsBackend::Noop => Arc::new(NoopMeter),
            MetricsBackend::Otel => Arc::new(OtelMeter::new()),
        };
        if let Err(e) = init_meter(meter) {
            tracing::warn!(error = %e, "Metrics meter not installed");
        }
        tracing::debug!(%backend, "Metrics initialized");
    }

    /// Remote runners when configured, in-process ones otherwise
    fn collaborators(
        config: &AppConfig,
    ) -> Result<(Arc<dyn TargetInvoker>, Arc<dyn EvaluatorInvoker>)> {
        let target: Arc<dyn TargetInvoker> = match &config.collaborators.target_url {
            Some(url) => Arc::new(
                HttpTargetInvoker::new(url)
                    .with_context(|| format!("Invalid target url: {}", url))?,
            ),
            None => Arc::new(EchoTargetInvoker),
        };
        let evaluator: Arc<dyn EvaluatorInvoker> = match &config.collaborators.evaluator_url {
            Some(url) => Arc::new(
                HttpEvaluatorInvoker::new(url)
                    .with_context(|| format!("Invalid evaluator url: {}", url))?,
            ),
            None => Arc::new(ExactMatchEvaluatorInvoker),
        };
        Ok((target, evaluator))
    }

    fn handle_system_command(cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes),
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete spans, annotations, views and experiments in:");
        println!("  {}", data_dir.display());
        println!();
        println!("Stop the server first; pruning a live data directory corrupts the stores.");

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();
        app.start_background_tasks().await?;

        tracing::info!(
            host = %app.config.server.host,
            port = app.config.server.port,
            data_dir = %app.storage.data_dir().display(),
            version = env!("CARGO_PKG_VERSION"),
            "{} listening",
            APP_NAME
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) -> Result<()> {
        for handle in self.stores.start_background_tasks(
            self.config.trace.retention_interval_secs,
            self.shutdown.subscribe(),
        ) {
            self.shutdown.register(handle).await;
        }

        let ingest = IngestConsumer::new(self.services.ingestor.clone());
        self.shutdown
            .register(spawn_consumer(
                ingest,
                &self.ingest_topic,
                self.shutdown.subscribe(),
            ))
            .await;

        let annotations = AnnotationEventConsumer::new(self.services.annotations.clone());
        self.shutdown
            .register(spawn_consumer(
                annotations,
                &self.annotation_topic,
                self.shutdown.subscribe(),
            ))
            .await;

        let resumed = self
            .runner
            .resume()
            .await
            .context("Failed to resume active experiments")?;
        if resumed > 0 {
            tracing::info!(count = resumed, "Resumed active experiments");
        }
        if let Some(h) = self.runner.start_reaper(self.shutdown.subscribe()) {
            self.shutdown.register(h).await;
        }

        tracing::debug!("Background tasks started");
        Ok(())
    }
}
