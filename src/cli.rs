use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "stepsync")]
#[command(about = "StepSync - workflow step editor synchronization core", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Preview endpoint URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub preview_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract a step record from a JSON object of raw fields
    Extract {
        /// JSON file with the raw field set
        #[arg(long)]
        fields: PathBuf,

        /// Step type (question, action, decision, ...)
        #[arg(short = 't', long = "type")]
        step_type: String,

        /// Position of the step in the workflow
        #[arg(long, default_value = "0")]
        index: usize,
    },

    /// Show variable suggestions for a cursor position
    Complete {
        /// Field text
        #[arg(long)]
        text: String,

        /// Cursor byte offset (default: end of text)
        #[arg(long)]
        cursor: Option<usize>,

        /// Known variables (comma-separated)
        #[arg(long, default_value = "")]
        variables: String,

        /// Commit the suggestion at this position and print the new text
        #[arg(long)]
        select: Option<usize>,
    },

    /// Infer yes/no branches for a decision step
    Infer {
        /// JSON file with an array of step records
        #[arg(long)]
        steps: PathBuf,

        /// Index of the decision step
        #[arg(long)]
        decision: usize,

        /// Build the candidate from the source question at this position
        #[arg(long)]
        pick: Option<usize>,

        /// Path taken on a yes answer
        #[arg(long, default_value = "")]
        yes: String,

        /// Path taken on a no answer
        #[arg(long, default_value = "")]
        no: String,
    },

    /// Fetch one rendered preview
    Preview {
        /// JSON file with the raw field set
        #[arg(long)]
        fields: PathBuf,

        /// Step type (question, action, decision, ...)
        #[arg(short = 't', long = "type")]
        step_type: String,

        /// Position of the step in the workflow
        #[arg(long, default_value = "0")]
        index: usize,
    },

    /// Fetch and print the variable catalog of a workflow
    Variables {
        /// Workflow ID
        #[arg(long)]
        workflow_id: String,
    },

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    use crate::catalog::{HttpVariableSource, VariableCatalog};
    use crate::config::Config;
    use crate::extract::extract;
    use crate::preview::{HttpPreviewFetcher, PreviewFetcher, PreviewResponse};
    use crate::types::PreviewRequest;

    // Load config eagerly so errors surface before any command output
    let config = Config::builder()
        .config_path(cli.config.map(PathBuf::from))
        .preview_url(cli.preview_url)
        .build()
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Extract {
            fields,
            step_type,
            index,
        } => {
            let step_type = step_type.parse().map_err(|e: String| anyhow!(e))?;
            let fields = read_fields(&fields)?;
            let record = extract(&fields, step_type, index);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Complete {
            text,
            cursor,
            variables,
            select,
        } => {
            complete(&config, &text, cursor, &variables, select)?;
        }

        Commands::Infer {
            steps,
            decision,
            pick,
            yes,
            no,
        } => {
            use crate::branch::{build_candidate, infer_preceding};
            use crate::types::StepRecord;

            let raw = std::fs::read_to_string(&steps)
                .with_context(|| format!("Failed to read {}", steps.display()))?;
            let records: Vec<StepRecord> =
                serde_json::from_str(&raw).context("Steps file must be an array of step records")?;
            let sources = infer_preceding(decision, &records);

            match pick {
                Some(i) => {
                    let question = sources.get(i).ok_or_else(|| {
                        anyhow!("No source question {} ({} found)", i, sources.len())
                    })?;
                    let candidate = build_candidate(question, &yes, &no);
                    println!("{}", serde_json::to_string_pretty(&candidate)?);
                }
                None if sources.is_empty() => {
                    println!("No yes/no questions before step {}", decision);
                }
                None => {
                    for (i, q) in sources.iter().enumerate() {
                        println!(
                            "  [{}] step {} | {} | {}",
                            i, q.step_index, q.variable_name, q.title
                        );
                    }
                }
            }
        }

        Commands::Preview {
            fields,
            step_type,
            index,
        } => {
            let step_type = step_type.parse().map_err(|e: String| anyhow!(e))?;
            let fields = read_fields(&fields)?;
            let request = PreviewRequest {
                step_index: index,
                record: extract(&fields, step_type, index),
                request_id: 1,
            };

            let fetcher = HttpPreviewFetcher::new(
                config.endpoints.preview_url.clone(),
                config.http_timeout(),
            )?;
            match fetcher.fetch(&request).await? {
                PreviewResponse::Html(html) => println!("{}", html),
                PreviewResponse::Stream(fragments) => {
                    for f in fragments {
                        println!("{:?} #{}", f.action, f.target);
                        if !f.content.is_empty() {
                            println!("  {}", f.content);
                        }
                    }
                }
            }
        }

        Commands::Variables { workflow_id } => {
            let source = HttpVariableSource::for_workflow(
                &config.endpoints.variables_url,
                &workflow_id,
                config.http_timeout(),
            )?;
            let catalog = VariableCatalog::new();
            let count = catalog.reload(&source).await?;

            println!("Found {} variable(s):\n", count);
            for token in catalog.tokens() {
                println!("  {}", token.name);
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn complete(
    config: &crate::config::Config,
    text: &str,
    cursor: Option<usize>,
    variables: &str,
    select: Option<usize>,
) -> Result<()> {
    use crate::autocomplete::{FieldId, VariableAutocompleteEngine};
    use crate::catalog::VariableCatalog;

    let catalog = Arc::new(VariableCatalog::new());
    catalog.replace(variables.split(',').map(str::to_string));

    let mut engine = VariableAutocompleteEngine::new(catalog, config.blur_grace());
    let field = FieldId::new(0, "text");
    let cursor = cursor.unwrap_or(text.len());

    if !engine.on_text_change(&field, text, cursor) {
        println!("No suggestions");
        return Ok(());
    }

    match select {
        Some(i) => {
            let insertion = engine
                .on_pointer_select(i, Instant::now())
                .ok_or_else(|| anyhow!("No suggestion at position {}", i))?;
            println!("{}", insertion.text);
            println!("cursor: {}", insertion.cursor);
        }
        None => {
            if let Some(span) = engine.active_span() {
                println!("span: {}..{} query: {:?}", span.start, span.end, span.query);
            }
            for (i, name) in engine.suggestions().iter().enumerate() {
                let marker = if engine.highlighted() == Some(i) { ">" } else { " " };
                println!("{} [{}] {}", marker, i, name);
            }
        }
    }

    Ok(())
}

/// Raw fields from a JSON object. Strings and booleans map directly; other
/// values are kept as their JSON text.
fn read_fields(path: &Path) -> Result<crate::fields::FieldSet> {
    use crate::fields::{FieldSet, FieldValue};

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    let Value::Object(map) = value else {
        bail!("{} must contain a JSON object of fields", path.display());
    };

    Ok(map
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => FieldValue::Text(s),
                Value::Bool(b) => FieldValue::Checked(b),
                Value::Null => FieldValue::Text(String::new()),
                other => FieldValue::Text(other.to_string()),
            };
            (name, value)
        })
        .collect::<FieldSet>())
}
