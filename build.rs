// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn package_arg(help: &'static str) -> Arg {
    Arg::new("package").required(true).help(help)
}

fn build_cli() -> Command {
    Command::new("mpkg")
        .version(env!("CARGO_PKG_VERSION"))
        .author("mpkg Contributors")
        .about("Minimal package manager with conflict detection and precise removal")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .default_value("/etc/mpkg.conf")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("db_path")
                .long("db-path")
                .value_name("DIR")
                .global(true)
                .help("Package index directory (overrides PKG_DB_PATH)"),
        )
        .arg(
            Arg::new("cache_path")
                .long("cache-path")
                .value_name("DIR")
                .global(true)
                .help("Download cache directory (overrides PKG_CACHE_PATH)"),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .global(true)
                .help("Install root directory (overrides PKG_ROOT)"),
        )
        .arg(
            Arg::new("repo_url")
                .long("repo-url")
                .value_name("URL")
                .global(true)
                .help("Repository URL (overrides PKG_REPO_URL)"),
        )
        .arg(
            Arg::new("local_repo")
                .long("local-repo")
                .value_name("DIR")
                .global(true)
                .help("Read package archives from a local directory"),
        )
        .subcommand(
            Command::new("install")
                .about("Install one or more packages")
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Package names"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an installed package and its files")
                .arg(package_arg("Package name to remove")),
        )
        .subcommand(Command::new("list").about("List installed packages"))
        .subcommand(
            Command::new("info")
                .about("Show details of an installed package")
                .arg(package_arg("Package name"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print as JSON"),
                ),
        )
        .subcommand(
            Command::new("update")
                .about("Update a package, or sync the repository catalog when no package is given")
                .arg(Arg::new("package").help("Package name (syncs the catalog if omitted)")),
        )
        .subcommand(
            Command::new("search")
                .about("Search installed packages and the repository catalog")
                .arg(Arg::new("query").required(true).help("Substring to match against package names")),
        )
        .subcommand(
            Command::new("ghost")
                .about("Extract a package's files without recording it as installed")
                .arg(package_arg("Package name")),
        )
        .subcommand(Command::new("self-update").about("Replace the mpkg binary with the latest release"))
        .subcommand(
            Command::new("stats")
                .about("Show installed package statistics")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print as JSON"),
                ),
        )
        .subcommand(
            Command::new("clean")
                .about("Remove installed packages")
                .arg(
                    Arg::new("aggressive")
                        .long("aggressive")
                        .action(ArgAction::SetTrue)
                        .help("Remove every package except the protected ones"),
                ),
        )
        .subcommand(Command::new("doctor").about("Check that every manifested file still exists"))
        .subcommand(
            Command::new("history")
                .about("Show recent actions")
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .long("limit")
                        .default_value("20")
                        .help("Number of entries to show"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
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

    let man_path = man_dir.join("mpkg.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
