// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("mmpack-build")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Mmpack Contributors")
        .about("Binary package builder with symbol-based dependency inference")
        .subcommand_required(false)
        .subcommand(
            Command::new("pkg-create")
                .about("Package a staged install tree into .mpk archives")
                .arg(
                    Arg::new("build_dir")
                        .required(true)
                        .help("Build directory holding the staged files under install/"),
                )
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .required(true)
                        .help("Source package name"),
                )
                .arg(
                    Arg::new("version")
                        .short('V')
                        .long("version")
                        .required(true)
                        .help("Source package version"),
                )
                .arg(
                    Arg::new("arch")
                        .short('a')
                        .long("arch")
                        .help("Target architecture (default: host)"),
                )
                .arg(
                    Arg::new("description")
                        .short('d')
                        .long("description")
                        .default_value("")
                        .help("Source package description"),
                )
                .arg(
                    Arg::new("dest")
                        .long("dest")
                        .help("Output directory (default: the workspace packages directory)"),
                )
                .arg(
                    Arg::new("prefix")
                        .short('p')
                        .long("prefix")
                        .default_value("/")
                        .help("Prefix whose installed packages may satisfy dependencies"),
                )
                .arg(
                    Arg::new("scripts_dir")
                        .long("scripts-dir")
                        .default_value("/usr/share/mmpack-build")
                        .help("Directory holding the ecosystem analyzer scripts"),
                ),
        )
        .subcommand(
            Command::new("clean")
                .about("Remove copied sources and temporary build objects")
                .arg(Arg::new("pkg").help("Only clean entries of the given package name prefix")),
        )
        .subcommand(Command::new("wipe").about("Same as clean, but also remove produced packages"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("mmpack-build.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
