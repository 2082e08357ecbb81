//! 学籍同步 worker：投递、排空、死信重放、常驻轮询与示例运行

mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::{ClientSource, WorkerConfig};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use sync_application::{
    ClientFactory, EventType, EventTypeRegistry, HandlerContext, Sandbox, SecretProvider,
    ServiceClients, StaticSecrets, samples,
};
use sync_domain::eventing::{
    DeadLetterReprocessor, DeliveryReport, Dispatcher, DrainReport, InMemoryQueue, MessageQueue,
    RecordFailure, SyncEngine, UndeliveredRecord,
};
use sync_domain::{DeliveryEnvelope, FeatureFlags};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sync-worker", about = "事件驱动的学籍数据同步")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 处理来自文件或标准输入的投递信封（{"Records": [...]}）
    Deliver {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// 排空队列直到返回空批次（默认工作队列）
    Drain {
        #[arg(long)]
        queue: Option<String>,
    },
    /// 重放死信队列
    Dlq,
    /// 在预置数据的沙箱后端上运行一个内置示例事件
    Sample {
        key: String,
        /// 忽略 SYNC_FEATURE_FLAGS，开启全部受控操作
        #[arg(long)]
        all_features: bool,
    },
    /// 轮询工作队列并定期重放死信队列，直到收到中断信号
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    init_logging(config.json_logs);

    tracing::info!(environment = %config.environment, "sync worker starting");

    match cli.command {
        Command::Deliver { file } => Worker::connect(config, false).await?.deliver(file).await,
        Command::Drain { queue } => Worker::connect(config, true).await?.drain(queue).await,
        Command::Dlq => Worker::connect(config, true).await?.replay().await,
        Command::Serve => Worker::connect(config, true).await?.serve().await,
        Command::Sample { key, all_features } => run_sample(&config, &key, all_features).await,
    }
}

fn init_logging(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sync_domain=info,sync_application=info,sqlx=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// 队列所在位置：配置了数据库时使用 pgmq，否则使用进程内存
enum QueueBackend {
    InMemory,
    #[cfg(feature = "postgres")]
    Pgmq(sqlx::PgPool),
}

impl QueueBackend {
    async fn connect(config: &WorkerConfig) -> Result<Self> {
        #[cfg(feature = "postgres")]
        if let Some(url) = &config.database_url {
            tracing::info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connected");
            return Ok(QueueBackend::Pgmq(pool));
        }

        #[cfg(not(feature = "postgres"))]
        if config.database_url.is_some() {
            tracing::warn!("DATABASE_URL ignored, built without the postgres feature");
        }
        tracing::warn!("using process-local in-memory queues");
        Ok(QueueBackend::InMemory)
    }

    /// 进程退出后队列内容是否仍然存在
    fn is_durable(&self) -> bool {
        !matches!(self, QueueBackend::InMemory)
    }

    async fn open(&self, name: &str) -> Result<Arc<dyn MessageQueue>> {
        match self {
            QueueBackend::InMemory => Ok(Arc::new(InMemoryQueue::new(name))),
            #[cfg(feature = "postgres")]
            QueueBackend::Pgmq(pool) => {
                let queue = sync_domain::eventing::PgmqQueue::new(pool.clone(), name);
                queue
                    .ensure_exists()
                    .await
                    .with_context(|| format!("Failed to create queue {name}"))?;
                Ok(Arc::new(queue))
            }
        }
    }
}

struct Worker {
    config: WorkerConfig,
    backend: QueueBackend,
    dispatcher: Arc<Dispatcher>,
    work_queue: Arc<dyn MessageQueue>,
    /// 非持久后端下的死信队列，结束前输出其内容
    local_dead_letter: Option<InMemoryQueue>,
}

impl Worker {
    /// `durable` 为真时拒绝在进程内存队列上运行
    async fn connect(config: WorkerConfig, durable: bool) -> Result<Self> {
        let configs = config.configs();
        let flags = config.load_feature_flags()?;
        let (factory, secrets) = client_factory(&config)?;
        let backend = QueueBackend::connect(&config).await?;
        if durable && !backend.is_durable() {
            bail!(
                "this mode needs a durable queue backend: set DATABASE_URL and build with --features postgres"
            );
        }

        let work_queue = backend.open(configs.work_queue()?).await?;
        let dead_letter_name = configs.dead_letter_queue()?;
        let local_dead_letter =
            (!backend.is_durable()).then(|| InMemoryQueue::new(dead_letter_name));
        let dead_letter: Arc<dyn MessageQueue> = match &local_dead_letter {
            Some(queue) => Arc::new(queue.clone()),
            None => backend.open(dead_letter_name).await?,
        };

        let clients = ServiceClients::builder()
            .configs(configs)
            .factory(factory)
            .secrets(secrets)
            .build();
        let context = HandlerContext::new(Arc::new(clients), Arc::new(flags));
        let dispatcher = build_dispatcher(context, dead_letter, &config);

        Ok(Self {
            config,
            backend,
            dispatcher: Arc::new(dispatcher),
            work_queue,
            local_dead_letter,
        })
    }

    /// 有记录既未成功也未进入死信队列时以非零状态退出，由投递方重投
    async fn deliver(self, file: Option<PathBuf>) -> Result<()> {
        let raw = read_input(file).await?;
        let report = self.dispatcher.handle_raw_delivery(&raw).await;

        let mut out = delivery_json(&report);
        if let Some(queue) = &self.local_dead_letter {
            tracing::warn!("dead-letter queue is in memory, printing its bodies");
            out["dead_letter_queue"] = json!(queue.bodies());
        }
        print_json(&out)?;

        if !report.is_settled() {
            bail!(
                "{} failed records could not be dead-lettered",
                report.undelivered.len()
            );
        }
        Ok(())
    }

    async fn drain(self, queue: Option<String>) -> Result<()> {
        let queue = match queue {
            Some(name) => self.backend.open(&name).await?,
            None => self.work_queue.clone(),
        };
        let report = self
            .dispatcher
            .drain(queue.as_ref())
            .await
            .with_context(|| format!("Failed to drain {}", queue.queue_name()))?;
        print_json(&drain_json(&report))
    }

    async fn replay(self) -> Result<()> {
        let report = DeadLetterReprocessor::new(self.dispatcher.clone())
            .drain()
            .await
            .context("Failed to replay dead-letter queue")?;
        print_json(&drain_json(&report))
    }

    async fn serve(self) -> Result<()> {
        let engine = SyncEngine::builder()
            .dispatcher(self.dispatcher.clone())
            .work_queue(self.work_queue.clone())
            .config(self.config.engine_config())
            .build();
        let handle = Arc::new(engine)
            .start()
            .context("Failed to start sync engine")?;

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("shutdown requested");
        handle.shutdown();
        handle.join().await.context("Sync engine stopped abnormally")
    }
}

/// 外部系统客户端工厂与凭据来源，未显式选择时拒绝运行
fn client_factory(
    config: &WorkerConfig,
) -> Result<(Arc<dyn ClientFactory>, Arc<dyn SecretProvider>)> {
    match config.clients {
        Some(ClientSource::Sandbox) => {
            tracing::warn!(
                environment = %config.environment,
                "using in-memory sandbox clients, no external system will be written"
            );
            Ok((
                Arc::new(Sandbox::new()),
                Arc::new(StaticSecrets::for_configs(&config.configs())),
            ))
        }
        None => bail!(
            "no client factory configured for {}: set SYNC_CLIENTS=sandbox to run against in-memory backends",
            config.environment
        ),
    }
}

fn build_dispatcher(
    context: HandlerContext,
    dead_letter: Arc<dyn MessageQueue>,
    config: &WorkerConfig,
) -> Dispatcher {
    let registry = EventTypeRegistry::new(context);
    Dispatcher::builder()
        .registry(Arc::new(registry))
        .dead_letter(dead_letter)
        .config(config.dispatcher_config())
        .build()
}

async fn run_sample(config: &WorkerConfig, key: &str, all_features: bool) -> Result<()> {
    let sample = samples::find(key).with_context(|| {
        let keys: Vec<_> = samples::samples().iter().map(|s| s.key).collect();
        format!("unknown sample `{key}`, available: {}", keys.join(", "))
    })?;
    let flags = if all_features {
        FeatureFlags::allow_all(EventType::ALL.map(|t| t.as_str()))
    } else {
        config.load_feature_flags()?
    };

    let sandbox = Sandbox::new();
    samples::seed(&sandbox);
    let configs = config.configs();
    let dead_letter = InMemoryQueue::new(configs.dead_letter_queue()?);
    let dispatcher = build_dispatcher(
        sandbox.context_for(configs, flags),
        Arc::new(dead_letter.clone()),
        config,
    );

    tracing::info!(sample = sample.key, "{}", sample.description);
    let body = sample.envelope.to_body()?;
    let report = dispatcher
        .handle_delivery(&DeliveryEnvelope::from_bodies([body]))
        .await;

    let mut out = delivery_json(&report);
    out["sandbox"] = json!({
        "calls": sandbox.calls(),
        "writes": sandbox.writes(),
        "dead_letter_queue": dead_letter.bodies(),
    });
    print_json(&out)
}

async fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Failed to read stdin")?;
            Ok(raw)
        }
    }
}

fn failures_json(failures: &[RecordFailure]) -> Value {
    failures
        .iter()
        .map(|f| {
            json!({
                "index": f.index,
                "message_id": f.message_id,
                "event_type": f.event_type,
                "kind": format!("{:?}", f.kind),
                "reason": f.reason,
            })
        })
        .collect()
}

fn undelivered_json(undelivered: &[UndeliveredRecord]) -> Value {
    undelivered
        .iter()
        .map(|u| {
            json!({
                "index": u.index,
                "itemIdentifier": u.message_id,
                "body": u.body,
            })
        })
        .collect()
}

fn delivery_json(report: &DeliveryReport) -> Value {
    json!({
        "processed": report.processed,
        "succeeded": report.succeeded,
        "dead_lettered": report.dead_lettered,
        "failures": failures_json(&report.failures),
        "batchItemFailures": undelivered_json(&report.undelivered),
    })
}

fn drain_json(report: &DrainReport) -> Value {
    json!({
        "batches": report.batches,
        "received": report.received,
        "acknowledged": report.acknowledged,
        "dead_lettered": report.dead_lettered,
        "retained": report.retained,
        "unacknowledged": report.unacknowledged,
        "failures": failures_json(&report.failures),
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> WorkerConfig {
        WorkerConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn unset_client_source_fails_fast() {
        let err = client_factory(&config(&[])).err().unwrap();
        assert!(err.to_string().contains("SYNC_CLIENTS"));
        assert!(client_factory(&config(&[("SYNC_CLIENTS", "sandbox")])).is_ok());
    }

    #[tokio::test]
    async fn queue_modes_refuse_in_memory_backend() {
        let config = config(&[("SYNC_CLIENTS", "sandbox")]);

        let err = Worker::connect(config.clone(), true).await.err().unwrap();
        assert!(err.to_string().contains("durable queue backend"));

        // deliver 可以在内存队列上运行，死信内容随结果输出
        let worker = Worker::connect(config, false).await.unwrap();
        assert!(worker.local_dead_letter.is_some());
    }
}
