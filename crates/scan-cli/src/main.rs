// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod catalogue;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use scan_core::{HierSpec, Mode, Opts};
use scan_registry::compile;
use scan_scheduler::Coordinator;
use scan_scheduler::cancel::CancellationToken;
use scan_scheduler::coordinator::ContextSpec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code for a usage error (bad flag combination, unknown region/service name).
const EXIT_USAGE_ERROR: i32 = 2;
/// Exit code for a non-empty, non-ignored error set in the compacted output.
const EXIT_SCAN_ERRORS: i32 = 3;

/// Regions offered by `--regions help`. The scanner itself treats a region
/// as an opaque string; this list exists only to give `help` something
/// useful to print.
const KNOWN_REGIONS: &[&str] = &["us-east-1", "us-west-2", "eu-west-1", "ap-southeast-1"];

#[derive(Parser, Debug)]
#[command(name = "cloudscan", version, about = "Dependency-directed cloud resource scanner")]
struct Cli {
    /// Account identifier to scan.
    #[arg(long, default_value = "000000000000")]
    account: String,

    /// Comma-separated region list, or `help` to list known regions.
    #[arg(long)]
    regions: Option<String>,

    /// Comma-separated service list (`no-` prefix excludes), or `help` to
    /// list catalogued services.
    #[arg(long)]
    services: Option<String>,

    /// Worker pool size.
    #[arg(long)]
    workers: Option<usize>,

    /// Emit compact (non-pretty) JSON.
    #[arg(long)]
    min: bool,

    /// Skip compaction and emit the raw call map.
    #[arg(long)]
    raw: bool,

    /// Skip non-root links; collect only each context's first-layer calls.
    #[arg(long)]
    roots_only: bool,

    /// Emit `#stats` subtree aggregates.
    #[arg(long)]
    stats: bool,

    /// Hierarchy depth (`0`-`4`) or an explicit `{account}/{region}/...,{id}` template.
    #[arg(long)]
    hier: Option<String>,

    /// Write the document here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Path to a `scan.toml` config file (defaults to `./scan.toml` if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a JSON Schema instead of running a scan: `config` or `document`.
    #[arg(long)]
    schema: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_hier(raw: &str) -> Result<HierSpec> {
    if let Ok(depth) = raw.parse::<u8>() {
        return Ok(HierSpec::Depth(depth));
    }
    if raw.contains("{id}") {
        return Ok(HierSpec::Template(raw.to_string()));
    }
    anyhow::bail!("--hier must be a depth (0-4) or a template containing {{id}}")
}

fn resolve_services(selector: &str) -> Result<Vec<&'static str>> {
    let mut include: Vec<&str> = Vec::new();
    let mut exclude: Vec<&str> = Vec::new();
    for token in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Some(name) = token.strip_prefix("no-") {
            exclude.push(name);
        } else {
            include.push(token);
        }
    }
    let base: Vec<&str> = if include.is_empty() { catalogue::names() } else { include };
    let mut resolved = Vec::new();
    for name in base {
        if exclude.contains(&name) {
            continue;
        }
        let entry = catalogue::find(name)
            .with_context(|| format!("unknown service '{name}' (try --services help)"))?;
        resolved.push(entry.name);
    }
    Ok(resolved)
}

fn resolve_regions(selector: &str) -> Vec<String> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run(cli: Cli) -> Result<i32> {
    if let Some(kind) = cli.schema.as_deref() {
        return print_schema(kind);
    }

    if cli.services.as_deref() == Some("help") {
        for name in catalogue::names() {
            println!("{name}");
        }
        return Ok(0);
    }
    if cli.regions.as_deref() == Some("help") {
        for region in KNOWN_REGIONS {
            println!("{region}");
        }
        return Ok(0);
    }

    let file_config = config::load_config(cli.config.as_deref())
        .context("loading scan.toml")?;
    if let Err(errors) = config::validate_config(&file_config) {
        for e in &errors {
            eprintln!("error: {e}");
        }
        return Ok(EXIT_USAGE_ERROR);
    }

    let workers = cli.workers.or(file_config.workers).unwrap_or(64);
    if workers == 0 {
        eprintln!("error: --workers must be at least 1");
        return Ok(EXIT_USAGE_ERROR);
    }

    let regions: Vec<String> = match cli.regions.as_deref() {
        Some(sel) => resolve_regions(sel),
        None => file_config.regions.clone().unwrap_or_else(|| vec![KNOWN_REGIONS[0].to_string()]),
    };
    if regions.is_empty() {
        eprintln!("error: no regions selected");
        return Ok(EXIT_USAGE_ERROR);
    }

    let service_selector = cli.services.clone().or_else(|| {
        file_config.services.as_ref().map(|s| s.join(","))
    });
    let services = match service_selector {
        Some(sel) => match resolve_services(&sel) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: {e:#}");
                return Ok(EXIT_USAGE_ERROR);
            }
        },
        None => catalogue::names(),
    };
    if services.is_empty() {
        eprintln!("error: no services selected");
        return Ok(EXIT_USAGE_ERROR);
    }

    let hier = match cli.hier.clone().or(file_config.hier.clone()) {
        Some(raw) => match parse_hier(&raw) {
            Ok(h) => h,
            Err(e) => {
                eprintln!("error: {e:#}");
                return Ok(EXIT_USAGE_ERROR);
            }
        },
        None => HierSpec::default(),
    };

    let roots_only = cli.roots_only || file_config.roots_only.unwrap_or(false);
    let stats = cli.stats || file_config.stats.unwrap_or(false);
    let raw = cli.raw || file_config.raw.unwrap_or(false);
    let minify = cli.min || file_config.min.unwrap_or(false);

    let mut mode = Mode::NONE;
    if roots_only {
        mode |= Mode::ROOTS_ONLY;
    }
    if stats {
        mode |= Mode::KEEP_STATS;
    }

    let opts = Opts { workers, mode, raw, minify, stats, hier };

    let mut registries: HashMap<String, Arc<scan_registry::Registry>> = HashMap::new();
    for name in &services {
        let entry = catalogue::find(name).expect("resolved from catalogue");
        let registry = compile((entry.build)())
            .with_context(|| format!("compiling service '{name}'"))?;
        registries.insert((*name).to_string(), Arc::new(registry));
    }

    let mut specs = Vec::new();
    for region in &regions {
        for name in &services {
            specs.push(ContextSpec {
                account: cli.account.clone(),
                region: region.clone(),
                service: (*name).to_string(),
                registry: Arc::clone(&registries[*name]),
                mode,
            });
        }
    }

    tracing::info!(contexts = specs.len(), workers, "starting scan");
    let coordinator = Coordinator::new(specs, workers, CancellationToken::new());
    let maps = coordinator.run().await;

    let document = scan_compact::build_document(&maps, &registries, &opts);
    let rendered = if opts.minify {
        serde_json::to_string(&document)
    } else {
        serde_json::to_string_pretty(&document)
    }
    .context("serializing output document")?;

    match &cli.out {
        Some(path) => std::fs::write(path, &rendered)
            .with_context(|| format!("writing output file '{}'", path.display()))?,
        None => println!("{rendered}"),
    }

    if !opts.raw && document_has_errors(&document) {
        return Ok(EXIT_SCAN_ERRORS);
    }
    Ok(0)
}

fn document_has_errors(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => map.iter().any(|(k, v)| {
            if k == "err" {
                !v.is_null()
            } else {
                document_has_errors(v)
            }
        }),
        serde_json::Value::Array(items) => items.iter().any(document_has_errors),
        _ => false,
    }
}

fn print_schema(kind: &str) -> Result<i32> {
    let schema = match kind {
        "config" => schemars::schema_for!(config::FileConfig),
        "document" => schemars::schema_for!(scan_core::Call),
        other => {
            eprintln!("error: unknown schema kind '{other}' (expected 'config' or 'document')");
            return Ok(EXIT_USAGE_ERROR);
        }
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(0)
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_USAGE_ERROR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hier_accepts_numeric_depth() {
        assert!(matches!(parse_hier("2").unwrap(), HierSpec::Depth(2)));
    }

    #[test]
    fn parse_hier_accepts_template_with_id() {
        let h = parse_hier("{service},{id}").unwrap();
        assert!(matches!(h, HierSpec::Template(t) if t == "{service},{id}"));
    }

    #[test]
    fn parse_hier_rejects_template_without_id() {
        assert!(parse_hier("{service}/{api}").is_err());
    }

    #[test]
    fn resolve_services_defaults_to_full_catalogue() {
        let names = resolve_services("").unwrap_or_else(|_| catalogue::names());
        assert!(names.contains(&"iam"));
    }

    #[test]
    fn resolve_services_honors_exclusion() {
        let names = resolve_services("no-diamond").unwrap();
        assert!(names.contains(&"iam"));
        assert!(!names.contains(&"diamond"));
    }

    #[test]
    fn resolve_services_rejects_unknown_name() {
        assert!(resolve_services("nonexistent").is_err());
    }

    #[test]
    fn resolve_regions_splits_and_trims() {
        assert_eq!(resolve_regions("us-east-1, eu-west-1"), vec!["us-east-1", "eu-west-1"]);
    }

    #[test]
    fn document_has_errors_detects_nested_err_field() {
        let doc = serde_json::json!({"a": {"b": {"err": {"code": "x"}}}});
        assert!(document_has_errors(&doc));
    }

    #[test]
    fn document_has_errors_ignores_null_err() {
        let doc = serde_json::json!({"a": {"err": null}});
        assert!(!document_has_errors(&doc));
    }
}
