use std::collections::HashMap;
use std::process::ExitCode;

use camino::Utf8Path;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indexmap::IndexMap;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gempro::app::{Project, RunResult};
use gempro::config::{ConfigLoader, ResolvedConfig};
use gempro::domain::{GeneId, PdbId, UniprotAccession};
use gempro::error::GemproError;
use gempro::homology::ItasserOrganizer;
use gempro::kegg::{KeggClient, KeggGene, KeggHttpClient};
use gempro::layout::ProjectLayout;
use gempro::output::{JsonOutput, LogProgress};
use gempro::pdb::{PdbClient, PdbEntryMetadata, PdbHttpClient, RankedStructure};
use gempro::qc::UngappedSequenceCheck;
use gempro::uniprot::{UniprotClient, UniprotHttpClient, UniprotRecord};

#[derive(Parser)]
#[command(name = "gempro")]
#[command(about = "Map genes of a metabolic model to representative sequences and structures")]
#[command(version, author)]
struct Cli {
    /// Project config (defaults to ./gempro.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the project directories and register the configured genes")]
    Init,
    #[command(about = "Run the configured mapping stages")]
    Run(RunArgs),
    #[command(about = "Print one gene's annotation")]
    Show(ShowArgs),
    #[command(about = "Count genes with and without representatives")]
    Summary,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, value_enum, default_value_t = StageSet::All)]
    stage: StageSet,
}

#[derive(Args)]
struct ShowArgs {
    gene: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageSet {
    Sequences,
    Structures,
    All,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GemproError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GemproError) -> u8 {
    match error {
        GemproError::MissingConfig
        | GemproError::ConfigRead(_)
        | GemproError::ConfigParse(_)
        | GemproError::InvalidManualInput(_)
        | GemproError::UnknownGene(_) => 2,
        GemproError::KeggHttp(_)
        | GemproError::KeggStatus { .. }
        | GemproError::UniprotHttp(_)
        | GemproError::UniprotStatus { .. }
        | GemproError::UniprotMappingTimeout(_)
        | GemproError::PdbHttp(_)
        | GemproError::PdbStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let layout = ProjectLayout::new(&config.root, &config.project);

    match cli.command {
        Commands::Init => {
            let mut project = Project::open(layout, NopKegg, NopUniprot, NopPdb)?;
            let result = project.init(&config.genes, &LogProgress)?;
            JsonOutput::print_init(&result).into_diagnostic()?;
        }
        Commands::Run(args) => run_stages(args.stage, &config, layout)?,
        Commands::Show(args) => {
            let gene: GeneId = args.gene.parse()?;
            let project = Project::open(layout, NopKegg, NopUniprot, NopPdb)?;
            JsonOutput::print_gene(project.gene(&gene)?).into_diagnostic()?;
        }
        Commands::Summary => {
            let project = Project::open(layout, NopKegg, NopUniprot, NopPdb)?;
            JsonOutput::print_summary(&project.summary()).into_diagnostic()?;
        }
    }
    Ok(())
}

fn run_stages(
    stage: StageSet,
    config: &ResolvedConfig,
    layout: ProjectLayout,
) -> miette::Result<()> {
    let kegg = KeggHttpClient::new()?;
    let uniprot = UniprotHttpClient::new()?;
    let pdb = PdbHttpClient::new()?;
    let mut project = Project::open(layout, kegg, uniprot, pdb)?;
    project.init(&config.genes, &LogProgress)?;

    let mut result = RunResult::default();
    if matches!(stage, StageSet::Sequences | StageSet::All) {
        result
            .stages
            .extend(project.run_sequence_stages(config, &LogProgress)?);
        project.save()?;
    }
    if matches!(stage, StageSet::Structures | StageSet::All) {
        // No BLAST backend is bundled; ranked and homology structures only.
        result.stages.extend(project.run_structure_stages(
            config,
            None,
            &ItasserOrganizer,
            UngappedSequenceCheck,
            &LogProgress,
        )?);
    }
    result.annotations = Some(project.save()?);
    result.missing = project.missing().clone();
    JsonOutput::print_run(&result).into_diagnostic()?;
    Ok(())
}

struct NopKegg;
struct NopUniprot;
struct NopPdb;

impl KeggClient for NopKegg {
    fn map_to_uniprot(
        &self,
        _organism: &str,
    ) -> Result<HashMap<String, UniprotAccession>, GemproError> {
        Ok(HashMap::new())
    }

    fn fetch_gene(&self, _organism: &str, _gene: &str) -> Result<Option<KeggGene>, GemproError> {
        Ok(None)
    }
}

impl UniprotClient for NopUniprot {
    fn map_ids(
        &self,
        _source_db: &str,
        _ids: &[String],
    ) -> Result<IndexMap<String, Vec<UniprotAccession>>, GemproError> {
        Ok(IndexMap::new())
    }

    fn fetch(&self, accession: &UniprotAccession) -> Result<UniprotRecord, GemproError> {
        Err(GemproError::UniprotHttp(format!(
            "offline command cannot fetch {accession}"
        )))
    }
}

impl PdbClient for NopPdb {
    fn best_structures(
        &self,
        _accession: &UniprotAccession,
        _seq_ident_cutoff: f64,
    ) -> Result<Vec<RankedStructure>, GemproError> {
        Ok(Vec::new())
    }

    fn entry_metadata(&self, _pdb: &PdbId) -> Result<Option<PdbEntryMetadata>, GemproError> {
        Ok(None)
    }

    fn download_structure(&self, pdb: &PdbId, _destination: &Utf8Path) -> Result<(), GemproError> {
        Err(GemproError::PdbHttp(format!("offline command cannot download {pdb}")))
    }
}
