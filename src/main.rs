// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use mmpack_build::analyzer::ScriptAnalyzer;
use mmpack_build::hooks::{self, ResolveContext};
use mmpack_build::pipeline::BuildPipeline;
use mmpack_build::syspkg::DebianSyspkgResolver;
use mmpack_build::version::Version;
use mmpack_build::workspace::Workspace;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "mmpack-build")]
#[command(author, version, about = "Binary package builder with symbol-based dependency inference", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Package a staged install tree into .mpk archives
    PkgCreate {
        /// Build directory holding the staged files under install/
        build_dir: PathBuf,
        /// Source package name
        #[arg(short, long)]
        name: String,
        /// Source package version
        #[arg(short = 'V', long)]
        version: String,
        /// Target architecture (default: host)
        #[arg(short, long)]
        arch: Option<String>,
        /// Source package description
        #[arg(short, long, default_value = "")]
        description: String,
        /// Output directory (default: the workspace packages directory)
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Prefix whose installed packages may satisfy dependencies
        #[arg(short, long, default_value = "/")]
        prefix: PathBuf,
        /// Directory holding the ecosystem analyzer scripts
        #[arg(long, default_value = "/usr/share/mmpack-build")]
        scripts_dir: PathBuf,
    },
    /// Remove copied sources and temporary build objects
    Clean {
        /// Only clean entries of the given package name prefix
        pkg: Option<String>,
    },
    /// Same as clean, but also remove produced packages
    Wipe,
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::PkgCreate {
            build_dir,
            name,
            version,
            arch,
            description,
            dest,
            prefix,
            scripts_dir,
        }) => {
            let workspace = Workspace::new()?;
            let dest = dest.unwrap_or_else(|| workspace.packages.clone());
            let arch = arch.unwrap_or_else(|| {
                format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
            });
            let version = Version::new(&version)?;

            info!("packaging {} {} from {}", name, version, build_dir.display());

            let analyzer = ScriptAnalyzer::python3(&scripts_dir);
            let ctx = ResolveContext::new(
                &prefix.join("var/lib/mmpack/metadata"),
                Box::new(DebianSyspkgResolver),
            );
            let pipeline = BuildPipeline::new(
                &build_dir,
                &name,
                version,
                &arch,
                &description,
                hooks::default_hooks(&description, Box::new(analyzer)),
                ctx,
            );

            let archives = pipeline.run(&dest)?;
            println!("Created {} package(s):", archives.len());
            for mpk in &archives {
                println!("  {}", mpk.display());
            }
            Ok(())
        }
        Some(Commands::Clean { pkg }) => {
            let workspace = Workspace::new()?;
            workspace.clean(pkg.as_deref())?;
            println!("Workspace cleaned");
            Ok(())
        }
        Some(Commands::Wipe) => {
            let workspace = Workspace::new()?;
            workspace.wipe()?;
            println!("Workspace wiped");
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "mmpack-build",
                &mut std::io::stdout(),
            );
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("mmpack-build v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'mmpack-build --help' for usage information");
            Ok(())
        }
    }
}
