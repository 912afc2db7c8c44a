mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kb_core::{
    evaluate_cases, load_cases_json, load_embedder, respond, EmbeddingProvider, InboundMessage,
    KnowledgeBase, Resolver, ResolverConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_REQUIRED_PASS_RATE: f32 = 0.85;

#[derive(Debug, Parser)]
#[command(name = "kb_cli")]
#[command(about = "Answer questions from a small knowledge base, or ask the user to clarify")]
struct Cli {
    /// JSON file with resolver settings. The flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Knowledge base JSON (`{"topics": [...]}`). Defaults to the built-in hours/location topics.
    #[arg(long, global = true)]
    kb: Option<PathBuf>,

    /// Embedding model name, e.g. all-MiniLM-L6-v2, or "hash" for model-free embeddings.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Directory holding <model>.safetensors and <model>-tokenizer.json.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    high_threshold: Option<f32>,

    #[arg(long, global = true)]
    medium_threshold: Option<f32>,

    #[arg(long, global = true)]
    fuzzy_threshold: Option<u8>,

    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Try typo-tolerant lexical matching when semantic scores are inconclusive.
    /// A bare flag enables it; `--lexical-assist=false` disables it.
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    lexical_assist: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve one utterance and print the reply.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long, default_value = "cli")]
        sender: String,
        /// Print the outbound messages as a JSON array.
        #[arg(long)]
        json: bool,
    },
    /// Run labelled cases and report the pass rate.
    Eval {
        #[arg(long)]
        cases: PathBuf,
        #[arg(long, default_value_t = DEFAULT_REQUIRED_PASS_RATE)]
        min_pass_rate: f32,
    },
    /// List topics and their surface questions.
    Topics,
    /// Serve the REST webhook used by the dialogue engine.
    Serve {
        #[arg(long, default_value = "0.0.0.0:5005")]
        addr: SocketAddr,
    },
}

impl Cli {
    fn resolver_config(&self) -> Result<ResolverConfig> {
        let mut config = match &self.config {
            Some(path) => ResolverConfig::from_json_file(path)?,
            None => ResolverConfig::default(),
        };

        if let Some(model) = &self.model {
            config.embedding_model_name = model.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(v) = self.high_threshold {
            config.high_threshold = v;
        }
        if let Some(v) = self.medium_threshold {
            config.medium_threshold = v;
        }
        if let Some(v) = self.fuzzy_threshold {
            config.fuzzy_threshold = v;
        }
        if let Some(v) = self.top_k {
            config.top_k = v;
        }
        if let Some(v) = self.lexical_assist {
            config.lexical_assist_enabled = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn knowledge_base(&self) -> Result<KnowledgeBase> {
        match &self.kb {
            Some(path) => Ok(KnowledgeBase::from_json_file(path)?),
            None => Ok(KnowledgeBase::builtin()),
        }
    }

    fn resolver(&self) -> Result<Resolver<Box<dyn EmbeddingProvider>>> {
        let config = self.resolver_config()?;
        let kb = self.knowledge_base()?;
        let embedder = load_embedder(&config)?;
        Resolver::new(kb, embedder, config).context("build resolver")
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Ask {
            question,
            sender,
            json,
        } => {
            let resolver = cli.resolver()?;
            let inbound = InboundMessage {
                sender_id: sender.clone(),
                utterance: Some(question.clone()),
            };
            let replies = respond(&resolver, &inbound);

            if *json {
                println!(
                    "{}",
                    serde_json::to_string(&replies).context("serialize replies")?
                );
            } else {
                for reply in &replies {
                    println!("{}", reply.text);
                }
            }
        }
        Commands::Eval {
            cases,
            min_pass_rate,
        } => {
            let run_id = format!("eval-{}", chrono::Utc::now().timestamp_millis());
            let resolver = cli.resolver()?;
            let cases = load_cases_json(cases)?;
            let summary = evaluate_cases(&resolver, &cases);

            println!(
                "run_id={} model={} total={} passed={} failed={} pass_rate={:.4} required={:.4} meets_threshold={}",
                run_id,
                resolver.config().embedding_model_name,
                summary.total,
                summary.passed,
                summary.failed,
                summary.pass_rate,
                min_pass_rate,
                summary.meets(*min_pass_rate)
            );

            for o in &summary.outcomes {
                println!(
                    "case={} passed={} outcome={:?} topic_id={} score={} latency={:.1}ms",
                    o.case_id,
                    o.passed,
                    o.actual_outcome,
                    o.actual_topic_id.as_deref().unwrap_or("null"),
                    o.top_score
                        .map(|s| format!("{s:.4}"))
                        .unwrap_or_else(|| "null".to_string()),
                    o.latency_ms
                );
            }

            if !summary.meets(*min_pass_rate) {
                anyhow::bail!(
                    "pass rate {:.4} is below the required {:.4}",
                    summary.pass_rate,
                    min_pass_rate
                );
            }
        }
        Commands::Topics => {
            let kb = cli.knowledge_base()?;
            for topic in kb.topics() {
                println!("{}", topic.id);
                for question in &topic.surface_questions {
                    println!("  - {question}");
                }
            }
        }
        Commands::Serve { addr } => {
            let resolver = Arc::new(cli.resolver()?);
            info!(
                model = %resolver.config().embedding_model_name,
                lexical_assist = resolver.config().lexical_assist_enabled,
                "Resolver ready"
            );
            let runtime = tokio::runtime::Runtime::new().context("start tokio runtime")?;
            runtime.block_on(server::serve(resolver, *addr))?;
        }
    }

    Ok(())
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
