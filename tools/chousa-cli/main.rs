use chousa::prelude::*;
use chousa::store::SubmissionStore;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Runs offline survey flows and manages their pending submissions
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Optional engine configuration JSON file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a flow file without running it
    Validate {
        /// Path to the flow JSON file
        flow_path: String,
    },
    /// Run a flow interactively, prompting for every answer
    Run {
        /// Path to the flow JSON file
        flow_path: String,
        /// Directory holding runs and submissions
        #[arg(short, long, default_value = "runs")]
        store: PathBuf,
        /// Organization context JSON file
        #[arg(long)]
        org: Option<String>,
        /// Contact context JSON file
        #[arg(long)]
        contact: Option<String>,
        /// Continue an interrupted run instead of starting a new one
        #[arg(long)]
        resume: Option<Uuid>,
    },
    /// List submissions waiting for upload
    Pending {
        #[arg(short, long, default_value = "runs")]
        store: PathBuf,
    },
    /// Print the upload payload of every pending submission
    Export {
        #[arg(short, long, default_value = "runs")]
        store: PathBuf,
        /// Treat the exported submissions as uploaded and remove them
        #[arg(long)]
        confirm: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).unwrap_or_else(|e| {
            exit_with_error(&format!("Failed to load config from '{}': {}", path, e))
        }),
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Validate { flow_path } => run_validate(&flow_path, &config),
        Command::Run {
            flow_path,
            store,
            org,
            contact,
            resume,
        } => run_interactive(&flow_path, store, org, contact, resume, config),
        Command::Pending { store } => run_pending(store),
        Command::Export { store, confirm } => run_export(store, confirm),
    }
}

fn run_validate(flow_path: &str, config: &EngineConfig) {
    let start = Instant::now();
    let raw = read_file(flow_path);
    let loader = FlowLoader::builder()
        .version_gate(config.version_gate())
        .build();
    let flow = loader
        .load_str(&raw)
        .unwrap_or_else(|e| exit_with_error(&format!("Flow is not valid: {}", e)));

    println!("Flow is valid.");
    println!("  Name:          {}", flow.name());
    println!("  UUID:          {}", flow.uuid());
    println!("  Revision:      {}", flow.revision());
    println!("  Spec version:  {}", flow.spec_version());
    println!("  Action sets:   {}", flow.definition().action_sets.len());
    println!("  Rule sets:     {}", flow.definition().rule_sets.len());
    println!("  Questions:     {}", flow.question_count());
    println!("  Checked in:    {:?}", start.elapsed());
}

fn run_interactive(
    flow_path: &str,
    store_dir: PathBuf,
    org_path: Option<String>,
    contact_path: Option<String>,
    resume: Option<Uuid>,
    config: EngineConfig,
) {
    let flows = Arc::new(MemoryFlowSource::new());
    let (flow_uuid, _) = flows
        .insert(&read_file(flow_path))
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to read flow: {}", e)));

    let org = match org_path {
        Some(path) => OrgContext::from_file(&path)
            .unwrap_or_else(|e| exit_with_error(&format!("Failed to load org: {}", e))),
        None => OrgContext::new("local", "Local"),
    };
    let contact = match contact_path {
        Some(path) => ContactContext::from_file(&path)
            .unwrap_or_else(|e| exit_with_error(&format!("Failed to load contact: {}", e))),
        None => ContactContext::default(),
    };
    let store = FileStore::open(&store_dir).unwrap_or_else(|e| {
        exit_with_error(&format!(
            "Failed to open store '{}': {}",
            store_dir.display(),
            e
        ))
    });

    let engine = Engine::builder(org, Arc::new(store), flows)
        .config(config)
        .build();

    let mut run = match resume {
        Some(run_uuid) => engine
            .run(run_uuid)
            .unwrap_or_else(|e| exit_with_error(&format!("Failed to resume run: {}", e))),
        None => engine
            .start_run(&flow_uuid, contact)
            .unwrap_or_else(|e| exit_with_error(&format!("Failed to start run: {}", e))),
    };
    let run_uuid = run.run_uuid;
    println!("--- Run {} ---", run_uuid);

    let mut printed = run.steps.len();
    loop {
        run = match run.status {
            RunStatus::Active => engine.advance(run_uuid),
            RunStatus::WaitingForInput => {
                let answer = prompt_for_input("Answer", None);
                engine.resume(run_uuid, &answer)
            }
            RunStatus::WaitingForAsyncResult => {
                let answer = prompt_for_input("Lookup result (empty for timeout)", None);
                let outcome = if answer.is_empty() {
                    AsyncOutcome::TimedOut
                } else {
                    AsyncOutcome::Success(Value::Text(answer))
                };
                engine.resume_async(run_uuid, outcome)
            }
            RunStatus::Completed | RunStatus::Abandoned => break,
        }
        .unwrap_or_else(|e| exit_with_error(&format!("Run stopped: {}", e)));

        for step in run.steps.iter().skip(printed) {
            for message in &step.messages {
                println!("{}", message);
            }
            if let Some(category) = &step.category {
                println!("  -> {}", category);
            }
        }
        printed = run.steps.len();
    }

    println!("\nRun finished: {}", run.status);
    println!("  Steps:   {}", run.steps.len());
    println!("  Fields:  {}", run.field_values.len());
    let queued = engine
        .queued()
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to read queued runs: {}", e)));
    if queued > 0 {
        println!("  Queued child runs kept in the store: {}", queued);
    }
}

fn run_pending(store_dir: PathBuf) {
    let store = open_store(&store_dir);
    let pending = store
        .list_pending()
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to list submissions: {}", e)));

    if pending.is_empty() {
        println!("No submissions pending.");
        return;
    }
    println!("{} submission(s) pending:", pending.len());
    for submission in pending {
        println!(
            "  {}  flow {} (rev {})  completed {}",
            submission.run_uuid,
            submission.flow_uuid,
            submission.flow_revision,
            submission.completed_on.to_rfc3339()
        );
    }
}

fn run_export(store_dir: PathBuf, confirm: bool) {
    let store = open_store(&store_dir);
    let pending = store
        .list_pending()
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to list submissions: {}", e)));

    let payloads: Vec<serde_json::Value> = pending.iter().map(Submission::to_payload).collect();
    let output = serde_json::to_string_pretty(&payloads)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to encode payloads: {}", e)));
    println!("{}", output);

    if confirm {
        for submission in &pending {
            store
                .confirm_uploaded(submission.run_uuid)
                .unwrap_or_else(|e| exit_with_error(&format!("Failed to confirm upload: {}", e)));
        }
        eprintln!("Confirmed {} submission(s).", pending.len());
    }
}

fn open_store(store_dir: &Path) -> FileStore {
    FileStore::open(store_dir).unwrap_or_else(|e| {
        exit_with_error(&format!(
            "Failed to open store '{}': {}",
            store_dir.display(),
            e
        ))
    })
}

fn read_file(path: &str) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to read file '{}': {}", path, e)))
}

/// A helper function to prompt the user and read a line of input.
fn prompt_for_input(prompt_text: &str, default: Option<&str>) -> String {
    let mut line = String::new();
    let default_prompt = default.map_or("".to_string(), |d| format!(" [default: {}]", d));

    print!("> {}{}: ", prompt_text, default_prompt);
    if let Err(e) = io::stdout().flush() {
        exit_with_error(&format!("Failed to write prompt: {}", e));
    }
    if let Err(e) = io::stdin().read_line(&mut line) {
        exit_with_error(&format!("Failed to read line: {}", e));
    }
    let trimmed = line.trim().to_string();

    if trimmed.is_empty() {
        default.unwrap_or("").to_string()
    } else {
        trimmed
    }
}

fn exit_with_error(message: &str) -> ! {
    eprintln!("\nError: {}", message);
    std::process::exit(1);
}
