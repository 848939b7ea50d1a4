use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use debpkg_builder::config::Config;
use debpkg_builder::matrix::{plan, Architecture, Distribution, Distro, Driver, DriverOptions, PlanRequest};
use debpkg_builder::preflight;
use debpkg_builder::sandbox::{DockerRuntime, SandboxSettings, Sandboxes};
use debpkg_builder::source::{build_from_tree, SourcePackage};
use debpkg_builder::stages::{Pipeline, PipelineOptions, TerminalPrompt, TestMode};

#[derive(Parser)]
#[command(name = "debpkg-builder")]
#[command(about = "Build Debian packages in throwaway containers", long_about = None)]
struct Cli {
    /// Act on an existing .dsc file.
    #[arg(long, value_name = "PATH", conflicts_with = "working", required_unless_present = "working")]
    dsc: Option<PathBuf>,

    /// Build a source package from the tree in this directory first.
    #[arg(long, value_name = "DIR")]
    working: Option<PathBuf>,

    /// Distros to build for (default: debian).
    #[arg(long = "distros", value_enum)]
    distros: Vec<Distro>,

    /// Distributions to build for (default: sid).
    #[arg(long = "distributions", value_enum)]
    distributions: Vec<Distribution>,

    /// Architectures to build (default: i386 and amd64).
    #[arg(long = "architectures", value_enum)]
    architectures: Vec<Architecture>,

    /// Upload the result.
    #[arg(long)]
    upload: bool,

    /// Upload to the DELAYED queue with this many days (0-15). A delay of 0
    /// is different from no delay at all.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=15))]
    delayed: Option<u8>,

    /// How to test the built packages.
    #[arg(long = "test", value_enum, default_value_t = TestMode::Auto)]
    test: TestMode,

    /// Version suffix for rebuilds, e.g. "~bpo12" (overrides the config).
    #[arg(long)]
    rebuild_suffix: Option<String>,

    /// Increment the counter of an existing rebuild marker.
    #[arg(long)]
    bump_rebuild: bool,

    /// Extra apt source line added to build and test sandboxes.
    #[arg(long, value_name = "LINE")]
    extra_repo: Option<String>,

    /// Copy produced artifacts here.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the planned targets as JSON and exit.
    #[arg(long)]
    print_plan: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config = Config::load(cli.config.as_deref())?;

    let targets = plan(
        &PlanRequest {
            distros: cli.distros.clone(),
            distributions: cli.distributions.clone(),
            architectures: cli.architectures.clone(),
            upload: cli.upload,
        },
        &config.images,
    )?;

    if cli.print_plan {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }
    if targets.is_empty() {
        tracing::warn!("nothing to build");
        return Ok(());
    }

    preflight::check_runtime(&config.sandbox.runtime)?;

    let runtime = DockerRuntime::new(&config.sandbox.runtime);
    let sandboxes = Sandboxes::new(&runtime, SandboxSettings::from_config(&config));

    let source = match (&cli.dsc, &cli.working) {
        (Some(dsc), _) => SourcePackage::load(dsc)?,
        (None, Some(tree)) => build_from_tree(&sandboxes, &config.images.working_tree, tree)
            .with_context(|| format!("building source package from '{}'", tree.display()))?,
        (None, None) => anyhow::bail!("one of --dsc or --working is required"),
    };
    tracing::info!("{} {} from '{}'", source.package, source.version, source.dsc.display());

    let pipeline_options = PipelineOptions {
        test_mode: cli.test,
        upload: cli.upload,
        delayed: cli.delayed,
        extra_repo: cli.extra_repo.clone(),
    };
    let driver_options = DriverOptions {
        rebuild_suffix: cli.rebuild_suffix.clone(),
        bump_rebuild: cli.bump_rebuild,
        output_dir: cli.output_dir.clone(),
    };
    let prompt = TerminalPrompt;
    let driver = Driver::new(
        &config,
        &sandboxes,
        Pipeline::new(&sandboxes, &prompt, &pipeline_options),
        &driver_options,
    );

    let produced = driver.run(&source, &targets)?;
    for changes in &produced {
        tracing::info!("built {}", changes.path.display());
    }
    tracing::info!("{} of {} target(s) produced output", produced.len(), targets.len());
    Ok(())
}
