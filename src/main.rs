// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, debug, error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

use mtworker::app_config::{self, Config};
use mtworker::broker::{AmqpBroker, MemoryBroker, ReplyRouting};
use mtworker::task::WorkerStats;
use mtworker::Controller;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for ReplyRouting to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliReplyRouting {
    /// reply_to property and correlation id
    #[value(alias = "reply-to")]
    Direct,
    /// Routing key map in the message headers
    #[value(alias = "header")]
    Headers,
}

impl From<CliReplyRouting> for ReplyRouting {
    fn from(cli_routing: CliReplyRouting) -> Self {
        match cli_routing {
            CliReplyRouting::Direct => ReplyRouting::Direct,
            CliReplyRouting::Headers => ReplyRouting::Headers,
        }
    }
}

/// Model and engine options shared by every command that translates
#[derive(Args, Debug, Clone)]
struct ModelArgs {
    /// Model directory (env MODEL_DIR)
    #[arg(short = 'd', long, env = "MODEL_DIR", default_value = "model")]
    model_dir: PathBuf,

    /// Model, a language pair such as 'de-en' (env MODEL)
    #[arg(short, long, env = "MODEL")]
    model: String,

    /// Remote decoder engine URL; no engine is started when set (env DECODER_URL)
    #[arg(long, env = "DECODER_URL")]
    decoder_url: Option<String>,

    /// Decoder engine executable (env MARIAN_SERVER_EXE)
    #[arg(long, env = "MARIAN_SERVER_EXE")]
    marian_server_exe: Option<PathBuf>,

    /// Seconds to wait between engine or broker connection attempts (env RECONNECT_DELAY)
    #[arg(long, env = "RECONNECT_DELAY", default_value_t = 5)]
    reconnect_delay: u64,

    /// Engine or broker connection attempts before giving up (env RECONNECT_MAX_TRIES)
    #[arg(long, env = "RECONNECT_MAX_TRIES", default_value_t = 720)]
    reconnect_max_tries: u32,

    /// Set logging level (env VERBOSE)
    #[arg(short, long, value_enum, env = "VERBOSE", ignore_case = true, default_value = "info")]
    verbose: CliLogLevel,
}

/// Job processing options
#[derive(Args, Debug, Clone)]
struct JobArgs {
    /// Messages to process in parallel (env PARALLEL)
    #[arg(short = 'n', long, env = "PARALLEL", default_value_t = 1)]
    parallel: usize,

    /// Message broker URL (env MESSAGE_BROKER_URL or RABBITMQ_URL)
    #[arg(long = "broker", env = "MESSAGE_BROKER_URL")]
    broker_url: Option<String>,

    /// Exchange for requests (env REQUEST_EXCHANGE)
    #[arg(long, env = "REQUEST_EXCHANGE", default_value = "")]
    request_exchange: String,

    /// Request queue (env REQUEST_QUEUE or QUEUE_IN)
    #[arg(short = 'Q', long, env = "REQUEST_QUEUE")]
    request_queue: Option<String>,

    /// Exchange for responses (env RESPONSE_EXCHANGE or EXCHANGE_OUT)
    #[arg(long, env = "RESPONSE_EXCHANGE")]
    response_exchange: Option<String>,

    /// Reply routing convention (env REPLY_ROUTING)
    #[arg(long, value_enum, env = "REPLY_ROUTING", ignore_case = true, default_value = "direct")]
    reply_routing: CliReplyRouting,

    /// Seconds to wait before taking jobs (env STARTUP_DELAY)
    #[arg(long, env = "STARTUP_DELAY", default_value_t = 0)]
    startup_delay: u64,

    /// Seconds between heartbeats while a job runs (env HEARTBEAT_PAUSE)
    #[arg(long, env = "HEARTBEAT_PAUSE", default_value_t = 10)]
    heartbeat_pause: u64,

    /// Seconds a translation may go without progress before the engine is restarted, 0 to disable (env RESTART_TIMEOUT)
    #[arg(long, env = "RESTART_TIMEOUT", default_value_t = 300)]
    restart_timeout: u64,

    /// Failures after which a job is rejected for good (env MAX_RETRIES_PER_JOB)
    #[arg(long, env = "MAX_RETRIES_PER_JOB", default_value_t = 3)]
    max_retries_per_job: u32,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the job worker against the message broker
    Worker {
        /// Read jobs as JSON lines from stdin and write replies to stdout instead
        #[arg(long)]
        stdin: bool,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        jobs: JobArgs,
    },

    /// Process one job file through the full handler and print the reply
    Task {
        /// JSON file with a job message or bare task data
        #[arg(value_name = "FILE", default_value = "test.json")]
        file: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        jobs: JobArgs,
    },

    /// Translate plain text or a JSON document from files or stdin
    Translate {
        /// Input files; stdin when none are given
        #[arg(value_name = "FILES")]
        files: Vec<PathBuf>,

        /// Translate every line as a separate document
        #[arg(short, long)]
        lines: bool,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Build the truecase database for a frequency list
    BuildTruecase {
        /// Truecase frequency list
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Set logging level
        #[arg(short, long, value_enum, env = "VERBOSE", ignore_case = true, default_value = "info")]
        verbose: CliLogLevel,
    },

    /// Generate shell completions for mtworker
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// mtworker - machine translation worker
///
/// Serves a neural machine translation engine behind a message queue:
/// pre-processes job text, translates it with the decoder engine,
/// post-processes the output and replies to the producer.
#[derive(Parser, Debug)]
#[command(name = "mtworker")]
#[command(version)]
#[command(about = "Machine translation job worker")]
#[command(long_about = "mtworker loads a translation model, starts its decoder engine and processes translation jobs.

EXAMPLES:
    mtworker worker -d /models -m de-en --broker amqp://rabbit:5672  # Consume jobs from RabbitMQ
    mtworker worker -d /models -m de-en --stdin < jobs.ndjson  # Process jobs from stdin
    mtworker task -m de-en job.json                       # Run one job and print the reply
    mtworker translate -m de-en --lines input.txt          # Translate a text file line by line
    mtworker build-truecase /models/de-en/truecase-model.de  # Prepare the truecase database
    mtworker completions bash > mtworker.bash              # Generate bash completions

CONFIGURATION:
    Every option can also be set through the environment variable named in
    its help text. The model directory holds one subdirectory per language
    pair with preprocess.json, postprocess.json and an optional decoder.json.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Log sink writing timestamped, coloured lines to stderr
struct WorkerLogger {
    level: LevelFilter,
}

impl WorkerLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        WorkerLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(WorkerLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn colour_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for WorkerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let colour = Self::colour_for_level(record.level());

            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} [MT WORKER] {:<5} {}\x1B[0m",
                colour,
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn apply_log_level(level: CliLogLevel) {
    let level: app_config::LogLevel = level.into();
    log::set_max_level(level.to_level_filter());
}

/// Value of a flag or its primary variable, else of an alias variable
fn with_env_alias(value: Option<String>, alias: &str) -> Option<String> {
    value.or_else(|| std::env::var(alias).ok().filter(|v| !v.is_empty()))
}

fn build_config(model: &ModelArgs, jobs: Option<&JobArgs>) -> Config {
    let mut config = Config::new(model.model_dir.clone(), model.model.clone());
    config.log_level = model.verbose.into();
    config.engine.url = model.decoder_url.clone();
    config.engine.executable = model.marian_server_exe.clone();
    config.engine.reconnect_delay_secs = model.reconnect_delay;
    config.engine.reconnect_max_tries = model.reconnect_max_tries;

    if let Some(jobs) = jobs {
        config.worker.parallel = jobs.parallel;
        config.worker.heartbeat_pause_secs = jobs.heartbeat_pause;
        config.worker.restart_timeout_secs = jobs.restart_timeout;
        config.worker.max_retries_per_job = jobs.max_retries_per_job;

        if let Some(url) = with_env_alias(jobs.broker_url.clone(), "RABBITMQ_URL") {
            config.broker.url = url;
        }
        if let Some(queue) = with_env_alias(jobs.request_queue.clone(), "QUEUE_IN") {
            config.broker.request_queue = queue;
        }
        if let Some(exchange) = with_env_alias(jobs.response_exchange.clone(), "EXCHANGE_OUT") {
            config.broker.response_exchange = exchange;
        }
        config.broker.request_exchange = jobs.request_exchange.clone();
        config.broker.reply_routing = jobs.reply_routing.into();
        config.broker.startup_delay_secs = jobs.startup_delay;
    }

    config
}

/// Load the model and bring up the engine
async fn start_controller(config: Config) -> Result<Controller> {
    let controller = Controller::with_config(config).context("Configuration validation failed")?;
    controller.start().await?;
    Ok(controller)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger once with info level by default
    WorkerLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "mtworker", &mut std::io::stdout());
            Ok(())
        }
        Commands::BuildTruecase { file, verbose } => {
            apply_log_level(verbose);
            let db_path = Controller::build_truecase(&file)?;
            println!("{}", db_path.display());
            Ok(())
        }
        Commands::Worker { stdin, model, jobs } => {
            apply_log_level(model.verbose);
            let config = build_config(&model, Some(&jobs));
            if stdin {
                run_stdin_worker(config).await
            } else {
                run_worker(config).await
            }
        }
        Commands::Task { file, model, jobs } => {
            apply_log_level(model.verbose);
            run_task(build_config(&model, Some(&jobs)), file).await
        }
        Commands::Translate { files, lines, model } => {
            apply_log_level(model.verbose);
            run_translate(build_config(&model, None), files, lines).await
        }
    }
}

fn report_stats(stats: &WorkerStats) {
    info!(
        "Processed {} job(s): {} acked, {} rejected, {} requeued",
        stats.acked + stats.rejected + stats.unacknowledged,
        stats.acked,
        stats.rejected,
        stats.requeued
    );
}

async fn run_worker(config: Config) -> Result<()> {
    let controller = start_controller(config).await?;
    let settings = controller.config().amqp_settings();

    let broker = match AmqpBroker::connect_with_retry(&settings, controller.config().reconnect_policy()).await {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            controller.shutdown().await;
            return Err(e).context("Message broker unavailable");
        }
    };

    info!("Worker started, consuming from '{}'", settings.request_queue);
    let result = tokio::select! {
        result = controller.run_worker(broker.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            Ok(WorkerStats::default())
        }
    };
    broker.close().await;
    controller.shutdown().await;

    report_stats(&result?);
    Ok(())
}

async fn run_stdin_worker(config: Config) -> Result<()> {
    let controller = start_controller(config).await?;

    let (outbox, mut replies) = mpsc::unbounded_channel();
    let broker = Arc::new(MemoryBroker::new().with_outbox(outbox));
    broker.declare_queue(&controller.config().broker.request_queue);

    let feeder = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut count = 0usize;
            while let Some(line) = lines.next_line().await? {
                if !line.trim().is_empty() {
                    broker.push_body(line);
                    count += 1;
                }
            }
            broker.close();
            debug!("Read {} job(s) from stdin", count);
            Ok::<_, std::io::Error>(())
        })
    };

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(message) = replies.recv().await {
            let _ = writeln!(stdout, "{}", String::from_utf8_lossy(&message.body));
            let _ = stdout.flush();
        }
    });

    info!("Worker started, reading jobs from stdin");
    let result = tokio::select! {
        result = controller.run_worker(broker.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            feeder.abort();
            Ok(WorkerStats::default())
        }
    };
    controller.shutdown().await;
    drop(broker);

    if let Ok(Err(e)) = feeder.await {
        error!("Failed to read jobs: {}", e);
    }
    let _ = printer.await;

    report_stats(&result?);
    Ok(())
}

async fn run_task(config: Config, file: PathBuf) -> Result<()> {
    info!("Reading {}", file.display());
    let body = std::fs::read(&file).with_context(|| format!("Failed to read task file: {}", file.display()))?;

    let controller = start_controller(config).await?;
    let result = controller.run_task(&body).await;
    controller.shutdown().await;

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn run_translate(config: Config, files: Vec<PathBuf>, lines: bool) -> Result<()> {
    let mut inputs = Vec::new();
    if files.is_empty() {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("Failed to read stdin")?;
        inputs.push(input);
    } else {
        for file in &files {
            let input = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read input file: {}", file.display()))?;
            inputs.push(input);
        }
    }

    let controller = start_controller(config).await?;
    let result = async {
        let mut translator = controller.translator().await?;
        for input in &inputs {
            let output = Controller::translate_input(translator.as_mut(), input, lines).await?;
            println!("{}", output);
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;
    controller.shutdown().await;

    result
}
