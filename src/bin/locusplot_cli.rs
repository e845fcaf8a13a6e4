use anyhow::{anyhow, Context, Result};
use locusplot::data_source::{
    AssociationSource, DataSources, GeneSource, LdSource, RecombinationRateSource, StaticSource,
};
use locusplot::render_export::export_svg_string;
use locusplot::{populate, standard_layout, FixedSurface};
use serde_json::Value;
use std::sync::Arc;
use std::{env, fs};

fn usage() {
    eprintln!(
        "Usage:\n  \
  locusplot_cli --version\n  \
  locusplot_cli render [--layout LAYOUT.json] [--region chr:start-end] \\\n      \
      [--source NS=URL | --static NS=DATA.json]... OUTPUT.svg\n\n  \
  NS is a field namespace (base, ld, gene, recomb, sig, ...).\n  \
  Tip: pass @file.json instead of inline JSON for --static"
    );
}

fn load_json_arg(value: &str) -> Result<Value> {
    let text = if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).with_context(|| format!("could not read JSON file '{path}'"))?
    } else {
        value.to_string()
    };
    serde_json::from_str(&text).with_context(|| "invalid JSON argument")
}

fn source_for(namespace: &str, url: &str) -> Arc<dyn locusplot::data_source::DataSource> {
    match namespace {
        "ld" => Arc::new(LdSource::new(url)),
        "gene" => Arc::new(GeneSource::new(url)),
        "recomb" => Arc::new(RecombinationRateSource::new(url)),
        _ => Arc::new(AssociationSource::new(url)),
    }
}

fn run() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version") {
        println!("locusplot {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.first().map(String::as_str) != Some("render") {
        usage();
        return Err(anyhow!("unknown command"));
    }

    let mut layout = standard_layout();
    let mut region: Option<String> = None;
    let mut sources = DataSources::default();
    let mut output: Option<String> = None;

    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--layout" => {
                let path = iter.next().ok_or_else(|| anyhow!("--layout needs a path"))?;
                layout = load_json_arg(&format!("@{path}"))?;
            }
            "--region" => {
                region = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("--region needs chr:start-end"))?
                        .clone(),
                );
            }
            "--source" => {
                let spec = iter.next().ok_or_else(|| anyhow!("--source needs NS=URL"))?;
                let (ns, url) = spec
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--source needs NS=URL, got '{spec}'"))?;
                sources.add(ns, source_for(ns, url));
            }
            "--static" => {
                let spec = iter.next().ok_or_else(|| anyhow!("--static needs NS=DATA"))?;
                let (ns, data) = spec
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--static needs NS=DATA, got '{spec}'"))?;
                sources.add(ns, Arc::new(StaticSource::new(load_json_arg(data)?)));
            }
            other if output.is_none() && !other.starts_with("--") => {
                output = Some(other.to_string());
            }
            other => {
                usage();
                return Err(anyhow!("unexpected argument '{other}'"));
            }
        }
    }
    let output = output.ok_or_else(|| {
        usage();
        anyhow!("missing OUTPUT.svg")
    })?;

    if let Some(region) = &region {
        layout["state"] = serde_json::json!({});
        let parsed = locusplot::region::parse_position_query(region)
            .ok_or_else(|| anyhow!("could not parse region '{region}'"))?;
        if let locusplot::region::PositionQuery::Range(r) = parsed {
            layout["state"] = serde_json::json!({ "chr": r.chr, "start": r.start, "end": r.end });
        }
    }

    let surface = FixedSurface {
        width: 800.0,
        height: 450.0,
    };
    let plot = populate(&surface, sources, &layout)?;
    if let Some(message) = plot.curtain() {
        return Err(anyhow!("data error: {message}"));
    }
    fs::write(&output, export_svg_string(&plot))
        .with_context(|| format!("could not write '{output}'"))?;
    println!("wrote {output}");
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
