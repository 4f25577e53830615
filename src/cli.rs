//! Minimal CLI: resolve -> (json | report)
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;

use crate::options::ReadOptions;
use crate::parse;

// ---------------------------------- TYPES --------------------------------- //

/// resolve @id/@ref JSON documents into plain graphs and inspect the result
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// resolve each document and print it back as JSON
    Resolve(ResolveOut),
    /// batch-resolve documents and report per-file status
    Check(CheckRun),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (one document per line)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct CommonSettings {
    /// Debugging: print CLI invocation settings and then terminate
    #[arg(long)]
    no_op: bool,

    /// Debugging: track elapsed time and then print to stderr
    #[arg(long)]
    track_time: bool,

    /// Debugging: disable parallelization
    #[arg(long)]
    no_parallel: bool,
}

#[derive(clap::Parser, Debug)]
struct ResolveOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// stop at the first document that fails instead of continuing
    #[arg(long)]
    fail_fast: bool,

    #[command(flatten)]
    common_settings: CommonSettings,
}

#[derive(clap::Parser, Debug)]
struct CheckRun {
    #[command(flatten)]
    input_settings: InputSettings,

    #[command(flatten)]
    common_settings: CommonSettings,
}

// ------------------------------ IMPLEMENTATION ---------------------------- //

impl InputSettings {
    /// Every (source, document) pair across all inputs, in input order.
    fn load_documents(&self) -> anyhow::Result<Vec<(PathBuf, serde_json::Value)>> {
        let source_paths = resolve_file_path_patterns(&self.input)?;
        let mut out = Vec::new();
        for source_path in source_paths {
            let src = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read {}", source_path.display()))?;
            if self.ndjson {
                for (i, line) in src.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let value = parse_json_document(line)
                        .with_context(|| format!("{}:{}", source_path.display(), i + 1))?;
                    out.push((source_path.clone(), value));
                }
            } else {
                let value = parse_json_document(&src)
                    .with_context(|| source_path.display().to_string())?;
                out.push((source_path.clone(), value));
            }
        }
        Ok(out)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let start = std::time::Instant::now();
        let mut print_elapsed_time = false;

        match &self.cmd {
            Command::Resolve(target) => {
                // - DEBUG PATH -
                if target.common_settings.no_op {
                    eprintln!("{self:#?}");
                    return Ok(());
                }
                if target.common_settings.track_time {
                    print_elapsed_time = true;
                }

                let documents = target.input_settings.load_documents()?;
                let options = ReadOptions::maps().with_close_stream(target.fail_fast);
                let mut rendered = Vec::<String>::new();
                for (path, value) in &documents {
                    let result = parse::parse_value(value)
                        .and_then(|doc| crate::resolver::resolve(doc, None, options.clone()));
                    match result {
                        Ok(graph) => {
                            rendered.push(serde_json::to_string_pretty(&graph.to_json())?);
                        }
                        // the close-stream signal: abandon the remaining
                        // inputs instead of reporting and reading on
                        Err(error) if options.close_stream => {
                            return Err(anyhow!("{}: {error}", path.display()));
                        }
                        Err(error) => {
                            eprintln!("{}: {error}", path.display());
                        }
                    }
                }

                let output = rendered.join("\n");
                match target.out.as_ref() {
                    Some(out) => {
                        if let Some(parent) = out.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(out, &output)?;
                    }
                    None => println!("{output}"),
                }
            }
            Command::Check(target) => {
                // - DEBUG PATH -
                if target.common_settings.no_op {
                    eprintln!("{self:#?}");
                    return Ok(());
                }
                if target.common_settings.track_time {
                    print_elapsed_time = true;
                }

                let documents = target.input_settings.load_documents()?;

                // MAP (parallel unless disabled): each document resolves on
                // its own; nothing is shared between resolve calls.
                let outcomes: Vec<(PathBuf, Result<usize, String>)> =
                    if target.common_settings.no_parallel {
                        documents
                            .iter()
                            .map(|(path, value)| (path.clone(), check_one(value)))
                            .collect()
                    } else {
                        documents
                            .par_iter()
                            .map(|(path, value)| (path.clone(), check_one(value)))
                            .collect()
                    };

                let mut failures = 0usize;
                for (path, outcome) in &outcomes {
                    match outcome {
                        Ok(nodes) => println!("ok   {} ({nodes} nodes)", path.display()),
                        Err(error) => {
                            failures += 1;
                            println!("FAIL {}: {error}", path.display());
                        }
                    }
                }
                println!("{} documents, {failures} failures", outcomes.len());
                if failures > 0 {
                    return Err(anyhow!("{failures} documents failed to resolve"));
                }
            }
        }

        if print_elapsed_time {
            eprintln!("resolution took {:?}", start.elapsed());
        }
        Ok(())
    }
}

fn check_one(value: &serde_json::Value) -> Result<usize, String> {
    let doc = parse::parse_value(value).map_err(|e| e.to_string())?;
    let nodes = doc.arena.len();
    crate::resolver::resolve(doc, None, ReadOptions::maps()).map_err(|e| e.to_string())?;
    Ok(nodes)
}

/// Parse one JSON document, naming the JSON path of the failure.
fn parse_json_document(src: &str) -> anyhow::Result<serde_json::Value> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        anyhow!("at JSON path {path}: {}", err.into_inner())
    })
}

// ------------------------------ INTERNAL HELPERS -------------------------- //

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                // Pattern was explicitly a glob but matched nothing -> surface as an error
                return Err(anyhow!("glob pattern matched no files: {pattern}"));
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
