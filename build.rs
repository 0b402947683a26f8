// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: packages to operate on
fn packages_arg() -> Arg {
    Arg::new("packages")
        .required(true)
        .num_args(1..)
        .value_name("PKG[@VARIANT]")
        .help("Packages, as NAME or NAME@VARIANT")
}

/// Common argument: variant for packages named without one
fn variant_arg() -> Arg {
    Arg::new("variant")
        .long("variant")
        .value_name("NAME")
        .help("Variant applied to packages named without one")
}

fn platform_args() -> Vec<Arg> {
    vec![
        Arg::new("jobs")
            .short('j')
            .long("jobs")
            .value_name("N")
            .help("Parallel make jobs per target"),
        Arg::new("workers")
            .long("workers")
            .value_name("N")
            .help("Targets built concurrently"),
        Arg::new("build")
            .long("build")
            .value_name("TRIPLE")
            .help("Build platform triple (default: detected)"),
        Arg::new("host")
            .long("host")
            .value_name("TRIPLE")
            .help("Platform the packages run on (default: the build platform)"),
    ]
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn build_cli() -> Command {
    Command::new("xyz")
        .version(env!("CARGO_PKG_VERSION"))
        .author("xyz Contributors")
        .about("Build relocatable, self-contained application bundles")
        .subcommand_required(false)
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .default_value(".")
                .help("Workspace root"),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("DIR")
                .help("Directory holding package rules (default: <root>/rules)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log debug output"),
        )
        .arg(flag("clean", "Remove build, install and devtree directories"))
        .arg(flag("clean-release", "Remove working directories and release artifacts"))
        .arg(flag("check-packages", "Check release manifests for conflicting files"))
        .subcommand(
            Command::new("build")
                .about("Build packages and their dependencies")
                .arg(packages_arg())
                .arg(variant_arg())
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Rebuild the named packages from scratch"),
                )
                .arg(flag(
                    "force-recursive",
                    "Rebuild the named packages and every dependency from scratch",
                ))
                .arg(flag(
                    "reconfigure",
                    "Rerun configure and later stages of the named packages",
                ))
                .args(platform_args()),
        )
        .subcommand(
            Command::new("plan")
                .about("Show the build order and which stages would run")
                .arg(packages_arg())
                .arg(variant_arg())
                .args(platform_args()),
        )
        .subcommand(
            Command::new("clean")
                .about("Remove working directories")
                .arg(flag("release", "Also remove release artifacts")),
        )
        .subcommand(
            Command::new("check-packages").about("Check release manifests for conflicting files"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("xyz.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
