use anyhow::Context;
use clap::{Parser, Subcommand};
use entities_core::config::{data_dir_from_env_value, form_cache_dir_from_env_value};
use entities_core::instance_provider::instance_name;
use entities_core::{
    apply_form_entities, CoreConfig, EntitiesRepository, EntityFinalizer, EntityInstanceProvider,
    FileEntitiesRepository, FormDefCache,
};
use entities_types::DatasetName;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xforms::InstanceTree;

#[derive(Parser)]
#[command(name = "entities")]
#[command(about = "Form entity tooling: parse forms, finalize submissions, inspect datasets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a form definition and print its entity metadata
    Parse {
        /// Path to the XForm XML
        form: PathBuf,
    },
    /// Finalize a filled instance and print the entity mutation
    Finalize {
        /// Path to the XForm XML
        form: PathBuf,
        /// Path to the submission XML
        instance: PathBuf,
        /// Apply the mutation to the local dataset store
        #[arg(long)]
        save: bool,
    },
    /// List datasets in the local store
    Datasets,
    /// List the entities of a dataset
    List {
        /// Dataset name
        dataset: String,
    },
    /// Print a dataset as a secondary instance
    Instance {
        /// Dataset name
        dataset: String,
        /// Only materialize the first row's schema
        #[arg(long)]
        partial: bool,
    },
}

/// Entry point for the `entities` command.
///
/// # Environment Variables
/// - `ENTITIES_DATA_DIR`: Directory for dataset storage (default: "entities_data")
/// - `ENTITIES_FORM_CACHE_DIR`: Directory for parsed form cache (default: "<data dir>/form_cache")
/// - `RUST_LOG`: Log filter (default adds "entities_core=info" and "entities=info")
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("entities_core=info".parse()?)
                .add_directive("entities=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let data_dir = data_dir_from_env_value(std::env::var("ENTITIES_DATA_DIR").ok());
    let form_cache_dir =
        form_cache_dir_from_env_value(std::env::var("ENTITIES_FORM_CACHE_DIR").ok(), &data_dir);
    let cfg = Arc::new(CoreConfig::new(data_dir, form_cache_dir)?);
    tracing::debug!(
        "using data dir {} and form cache {}",
        cfg.entities_data_dir().display(),
        cfg.form_cache_dir().display()
    );

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Parse { form }) => {
            let form_def = load_form(&cfg, &form)?;
            let save_tos: Vec<_> = form_def
                .entity_extra()
                .save_tos
                .iter()
                .map(|s| serde_json::json!({ "ref": s.node_ref, "property": s.property }))
                .collect();
            let summary = serde_json::json!({
                "title": form_def.title(),
                "form_id": form_def.form_id(),
                "form_version": form_def.form_version(),
                "entities_version": form_def.entities_version().map(|v| v.to_string()),
                "save_tos": save_tos,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some(Commands::Finalize {
            form,
            instance,
            save,
        }) => {
            let form_def = load_form(&cfg, &form)?;
            let xml = read(&instance)?;
            let tree = InstanceTree::load_submission(&form_def, &xml)
                .with_context(|| format!("loading submission {}", instance.display()))?;

            let extra = EntityFinalizer::new(&form_def).finalize(&tree);
            println!("{}", serde_json::to_string_pretty(&extra)?);

            if save {
                match extra {
                    Some(extra) => {
                        let repository = FileEntitiesRepository::new(cfg.clone());
                        tracing::info!(
                            "saving {} entities into {}",
                            extra.entities.len(),
                            repository.datasets_dir().display()
                        );
                        let summary = apply_form_entities(&extra, &repository)?;
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    }
                    None => {
                        tracing::warn!("form {} declares no entities", form.display());
                        println!("Form has no entity element; nothing saved.");
                    }
                }
            }
        }
        Some(Commands::Datasets) => {
            let repository = FileEntitiesRepository::new(cfg.clone());
            let datasets = repository.get_datasets()?;
            if datasets.is_empty() {
                println!("No datasets found.");
            }
            for dataset in datasets {
                println!("{} ({} entities)", dataset, repository.count(&dataset)?);
            }
        }
        Some(Commands::List { dataset }) => {
            let dataset = DatasetName::new(&dataset)?;
            let repository = FileEntitiesRepository::new(cfg.clone());
            let entities = repository.get_all(&dataset)?;
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        Some(Commands::Instance { dataset, partial }) => {
            let dataset = DatasetName::new(&dataset)?;
            let provider =
                EntityInstanceProvider::new(Arc::new(FileEntitiesRepository::new(cfg.clone())));
            let instance = provider.get(&dataset, &instance_name(&dataset), partial)?;
            println!("{}", instance.to_xml());
        }
        None => {
            println!("Use 'entities --help' for commands");
        }
    }

    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_form(cfg: &Arc<CoreConfig>, path: &Path) -> anyhow::Result<xforms::FormDef> {
    let xml = read(path)?;
    let form_def = FormDefCache::new(cfg.clone())
        .get_or_parse(&xml)
        .with_context(|| format!("parsing form {}", path.display()))?;
    tracing::info!(
        "loaded form {} ({} entity saveto bindings)",
        path.display(),
        form_def.entity_extra().save_tos.len()
    );
    Ok(form_def)
}
