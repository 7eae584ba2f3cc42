use bqviz::{
    logging, BqVizError, PipelineConfig, PipelineDef, PipelineLoader, QueryPipeline, ResultSet,
    Result, Session,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing::info;

#[derive(Parser)]
#[command(name = "bqviz")]
#[command(about = "Query BigQuery and render the results as charts or maps", version)]
struct Cli {
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (defaults to <config dir>/bqviz/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "BQVIZ_BILLING_PROJECT")]
    billing_project: Option<String>,

    #[arg(long, global = true)]
    data_project: Option<String>,

    #[arg(long, global = true)]
    dataset: Option<String>,

    #[arg(long, global = true)]
    location: Option<String>,

    /// Service account key file
    #[arg(long, global = true, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL generated for a pipeline
    Sql { file: PathBuf },

    /// Run a pipeline's query and print the rows
    Run {
        file: PathBuf,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Rows shown in table output
        #[arg(long, default_value = "50")]
        max_rows: usize,
    },

    /// Run a pipeline and write its rendered artifact
    Render {
        file: PathBuf,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run and render every pipeline under a directory
    RunAll {
        dir: PathBuf,

        #[arg(long)]
        out_dir: Option<PathBuf>,

        #[arg(long, default_value = "4")]
        parallelism: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())?;
        if let Some(v) = &self.billing_project {
            config.billing_project = v.clone();
        }
        if let Some(v) = &self.data_project {
            config.data_project = Some(v.clone());
        }
        if let Some(v) = &self.dataset {
            config.dataset = Some(v.clone());
        }
        if let Some(v) = &self.location {
            config.location = Some(v.clone());
        }
        if let Some(v) = &self.credentials {
            config.credentials_path = Some(v.clone());
        }
        Ok(config)
    }

    async fn open_pipeline(&self) -> Result<QueryPipeline> {
        let session = Session::open(self.pipeline_config()?).await?;
        Ok(QueryPipeline::new(session))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    if !atty::is(atty::Stream::Stdout) {
        colored::control::set_override(false);
    }

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} [{}] {}", "error".red().bold(), e.code(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Sql { file } => {
            let def = PipelineLoader::load_file(file)?;
            println!("{}", def.request.to_sql()?);
            Ok(())
        }
        Commands::Run {
            file,
            format,
            max_rows,
        } => {
            let def = PipelineLoader::load_file(file)?;
            let pipeline = cli.open_pipeline().await?;
            let rows = pipeline.submit(&def.request).await?;
            match format {
                OutputFormat::Table => print_table(&rows, *max_rows),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
            Ok(())
        }
        Commands::Render { file, out } => {
            let def = PipelineLoader::load_file(file)?;
            let pipeline = cli.open_pipeline().await?;
            let path = render_pipeline(&pipeline, &def, out.as_deref(), None).await?;
            println!("{} {} → {}", "✓".green(), def.name, path.display());
            Ok(())
        }
        Commands::RunAll {
            dir,
            out_dir,
            parallelism,
        } => {
            let defs = PipelineLoader::load_dir(dir)?;
            let pipeline = cli.open_pipeline().await?;
            run_all(&pipeline, &defs, out_dir.as_deref(), *parallelism).await
        }
    }
}

async fn render_pipeline(
    pipeline: &QueryPipeline,
    def: &PipelineDef,
    out: Option<&Path>,
    out_dir: Option<&Path>,
) -> Result<PathBuf> {
    let render = def.render.as_ref().ok_or_else(|| {
        BqVizError::Config(format!("Pipeline '{}' has no render section", def.name))
    })?;

    let (_, artifact) = pipeline
        .submit_and_render(&def.request, render.kind, &render.spec)
        .await?;

    let path = match out {
        Some(p) => p.to_path_buf(),
        None => def.output_path(out_dir, artifact.file_extension()),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, artifact.document()?)?;
    info!(
        pipeline = %def.name,
        path = %path.display(),
        fingerprint = %artifact.fingerprint()?,
        "Artifact written"
    );
    Ok(path)
}

async fn run_all(
    pipeline: &QueryPipeline,
    defs: &[PipelineDef],
    out_dir: Option<&Path>,
    parallelism: usize,
) -> Result<()> {
    let results: Vec<_> = stream::iter(defs)
        .map(|def| async move {
            let result = render_pipeline(pipeline, def, None, out_dir).await;
            (def, result)
        })
        .buffer_unordered(parallelism.max(1))
        .collect()
        .await;

    let mut failures = 0;
    for (def, result) in results {
        match result {
            Ok(path) => println!("{} {} → {}", "✓".green(), def.name, path.display()),
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "✗".red(), def.name, e);
            }
        }
    }

    println!(
        "\n{} succeeded, {} failed",
        (defs.len() - failures).to_string().green(),
        failures.to_string().red()
    );

    if failures > 0 {
        return Err(BqVizError::PipelineFailures {
            failed: failures,
            total: defs.len(),
        });
    }
    Ok(())
}

fn print_table(rows: &ResultSet, max_rows: usize) {
    let mut builder = Builder::default();
    builder.push_record(rows.column_names());
    for row in rows.rows().take(max_rows) {
        builder.push_record(row.iter().map(|(_, value)| value.to_string()));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{}", table);

    if rows.len() > max_rows {
        println!("{}", format!("… {} more rows", rows.len() - max_rows).dimmed());
    }
    println!("{}", format!("{} rows", rows.len()).dimmed());
}
