//! jitlaunch CLI - compile, cache and launch GPU kernels at runtime.
//!
//! # Commands
//!
//! - `jitlaunch run [SOURCE]` - Compile a kernel for a device, load it and launch it
//! - `jitlaunch compile [SOURCE]` - Emit the assembly or binary artifact
//! - `jitlaunch resolve [CATEGORY]` - Print resource directories
//! - `jitlaunch devices` - List devices and their architectures
//!
//! # Examples
//!
//! ```bash
//! # Dry run of the built-in hello kernel, no GPU required
//! jitlaunch run --backend mock
//!
//! # Launch a kernel from the project's kernels/ directory on device 1
//! jitlaunch run scale.cu --entry scale --device 1 --grid 64 --block 256 --backend cuda
//!
//! # Emit PTX for sm_90
//! jitlaunch compile --stage assembly --arch sm_90 -o hello.ptx
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use jitlaunch_core::{Architecture, Dim3, JitConfig, Stage};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::{compile, devices, parse_arch, parse_dim3, resolve, run, BackendKind};
use error::CliResult;

/// jitlaunch CLI - runtime compile-cache-launch pipeline for GPU kernels
#[derive(Parser)]
#[command(name = "jitlaunch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (TOML); JITLAUNCH_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device backend
    #[arg(short, long, global = true, value_enum, default_value = "cuda")]
    backend: BackendKind,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that compile a kernel.
#[derive(clap::Args)]
struct KernelArgs {
    /// Kernel source file, or a name in the kernels directory (default: built-in hello)
    source: Option<PathBuf>,

    /// Kernel entry point
    #[arg(short, long)]
    entry: Option<String>,

    /// Device id
    #[arg(short, long, allow_negative_numbers = true)]
    device: Option<i64>,

    /// Compile for this architecture instead of the device's
    #[arg(long, value_parser = parse_arch)]
    arch: Option<Architecture>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    /// PTX text
    Assembly,
    /// cubin
    Binary,
}

impl From<StageArg> for Stage {
    fn from(stage: StageArg) -> Self {
        match stage {
            StageArg::Assembly => Stage::Assembly,
            StageArg::Binary => Stage::Binary,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile, load and launch a kernel
    Run {
        #[command(flatten)]
        kernel: KernelArgs,

        /// Grid geometry: X[,Y[,Z]]
        #[arg(short, long, value_parser = parse_dim3)]
        grid: Option<Dim3>,

        /// Block geometry: X[,Y[,Z]]
        #[arg(long, value_parser = parse_dim3)]
        block: Option<Dim3>,

        /// Return after enqueueing without waiting for completion
        #[arg(long)]
        no_sync: bool,
    },

    /// Compile a kernel and write one stage's artifact
    Compile {
        #[command(flatten)]
        kernel: KernelArgs,

        /// Stage to emit
        #[arg(short, long, value_enum, default_value = "binary")]
        stage: StageArg,

        /// Output file (default: the configured artifact path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print resource directories
    Resolve {
        /// Category: kernels, include, third_party, data, toolkit (default: all)
        category: Option<String>,
    },

    /// List devices and their architectures
    Devices,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_kernel_args(config: &mut JitConfig, kernel: &KernelArgs) {
    if let Some(device) = kernel.device {
        config.launch.device = device;
    }
    if let Some(arch) = kernel.arch {
        config.compile.arch = Some(arch);
    }
}

fn execute(cli: Cli) -> CliResult<()> {
    let mut config = JitConfig::load_or_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            kernel,
            grid,
            block,
            no_sync,
        } => {
            apply_kernel_args(&mut config, &kernel);
            if let Some(grid) = grid {
                config.launch.grid = grid;
            }
            if let Some(block) = block {
                config.launch.block = block;
            }
            if no_sync {
                config.launch.synchronize = false;
            }
            let source =
                commands::load_source(&config, kernel.source.as_deref(), kernel.entry.as_deref())?;
            run::execute(&config, cli.backend, source)
        }

        Commands::Compile {
            kernel,
            stage,
            output,
        } => {
            apply_kernel_args(&mut config, &kernel);
            let source =
                commands::load_source(&config, kernel.source.as_deref(), kernel.entry.as_deref())?;
            compile::execute(&config, cli.backend, source, stage.into(), output.as_deref())
        }

        Commands::Resolve { category } => resolve::execute(&config, category.as_deref()),

        Commands::Devices => devices::execute(&config, cli.backend),

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "jitlaunch",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
