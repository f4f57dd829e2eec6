//! Userscript Collection CLI
//!
//! CLI tool for inspecting manifests and testing match patterns.

use std::fs;

use clap::{Parser, Subcommand};

use usc_core::{manifest::render_status, match_patterns, CompiledMatcher, Manifest, MatchOptions, Preset};

#[derive(Parser)]
#[command(name = "usc-cli")]
#[command(about = "Userscript collection manifest and match-pattern tools")]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the userscript configuration tree
    List {
        /// Manifest JSON file
        #[arg(short, long)]
        manifest: String,
    },

    /// Show which scripts would run on a URL
    Select {
        /// Manifest JSON file
        #[arg(short, long)]
        manifest: String,

        /// Page URL
        #[arg(short, long)]
        url: String,

        /// Print the selection as JSON
        #[arg(long)]
        json: bool,
    },

    /// Test URLs against match patterns
    Test {
        /// Match patterns
        #[arg(short, long, required = true)]
        pattern: Vec<String>,

        /// URLs to test
        #[arg(short, long, required = true)]
        url: Vec<String>,

        /// Browser rules to follow (chrome, firefox)
        #[arg(long, default_value = "chrome")]
        preset: Preset,

        /// Match any path
        #[arg(long)]
        loose: bool,
    },

    /// Print example URLs for match patterns
    Examples {
        /// Match patterns
        #[arg(short, long, required = true)]
        pattern: Vec<String>,

        /// Browser rules to follow (chrome, firefox)
        #[arg(long, default_value = "chrome")]
        preset: Preset,

        /// Match any path
        #[arg(long)]
        loose: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Commands::List { manifest } => cmd_list(&manifest),
        Commands::Select { manifest, url, json } => cmd_select(&manifest, &url, json),
        Commands::Test {
            pattern,
            url,
            preset,
            loose,
        } => cmd_test(&pattern, &url, preset, loose),
        Commands::Examples { pattern, preset, loose } => cmd_examples(&pattern, preset, loose),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_manifest(path: &str) -> Result<Manifest, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    Manifest::from_json(&content).map_err(|e| format!("Invalid manifest '{}': {}", path, e))
}

fn options_for(preset: Preset, loose: bool) -> MatchOptions {
    preset.options().with_strict(!loose)
}

fn compile(patterns: &[String], preset: Preset, loose: bool) -> Result<CompiledMatcher, String> {
    match_patterns(patterns, options_for(preset, loose))
        .assert_valid()
        .map_err(|e| format!("Invalid pattern: {}", e))
}

fn cmd_list(manifest: &str) -> Result<(), String> {
    let manifest = load_manifest(manifest)?;
    print!("{}", manifest.render_tree());
    Ok(())
}

fn cmd_select(manifest: &str, url: &str, json: bool) -> Result<(), String> {
    let manifest = load_manifest(manifest)?;
    let selections = manifest
        .select(url, &MatchOptions::default())
        .map_err(|e| format!("Selection failed: {}", e))?;

    if json {
        let out = serde_json::to_string_pretty(&selections).map_err(|e| format!("Failed to encode selection: {}", e))?;
        println!("{}", out);
    } else {
        println!("{}", render_status(&selections));
        let matched = selections.iter().filter(|s| s.matched).count();
        println!();
        println!("{} of {} scripts run on {}", matched, selections.len(), url);
    }
    Ok(())
}

fn cmd_test(patterns: &[String], urls: &[String], preset: Preset, loose: bool) -> Result<(), String> {
    let matcher = compile(patterns, preset, loose)?;
    log::debug!("Compiled {} patterns with {} rules", matcher.patterns().len(), preset);

    let mut failed = 0usize;
    for url in urls {
        let matched = matcher.matches(url);
        if !matched {
            failed += 1;
        }
        println!("{} {}", if matched { "match   " } else { "no match" }, url);
    }

    if failed > 0 {
        return Err(format!("{} of {} URLs did not match", failed, urls.len()));
    }
    Ok(())
}

fn cmd_examples(patterns: &[String], preset: Preset, loose: bool) -> Result<(), String> {
    let matcher = compile(patterns, preset, loose)?;
    for example in matcher.examples() {
        println!("{}", example);
    }
    Ok(())
}
