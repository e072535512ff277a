//! Strata command-line driver.
//!
//! Drives the full index lifecycle over the binary file pipeline: build
//! or load the coarse quantizer, train both codebooks on a learn set,
//! populate the inverted lists from the grouped base files, and run
//! queries against the finished index.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use strata_core::{
    reader, CoarseQuantizer, ProductQuantizer, StrataConfig, StrataIndex,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata", version, about = "Two-level vector search index")]
struct Cli {
    /// Configuration file (TOML); `STRATA_*` variables override it.
    #[arg(long, global = true, default_value = "Strata.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// File locations shared by every stage.
#[derive(Args)]
struct GraphPaths {
    /// Quantizer parameters and centroid payload.
    #[arg(long, default_value = "graph.info")]
    info: PathBuf,
    /// Quantizer adjacency lists.
    #[arg(long, default_value = "graph.edges")]
    edges: PathBuf,
}

#[derive(Args)]
struct CodebookPaths {
    /// Residual codebooks.
    #[arg(long, default_value = "pq.bin")]
    pq: PathBuf,
    /// Norm codebook.
    #[arg(long, default_value = "norm_pq.bin")]
    norm_pq: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Build the coarse quantizer from a raw centroid file, or load it
    /// if the graph files already exist.
    BuildQuantizer {
        /// Raw little-endian `f32[centroids * dimension]` centroid file.
        #[arg(long)]
        centroids: PathBuf,
        #[command(flatten)]
        graph: GraphPaths,
    },

    /// Train the residual and norm codebooks on a learn set.
    Train {
        /// Raw little-endian `f32[n * dimension]` learn file.
        #[arg(long)]
        learn: PathBuf,
        #[command(flatten)]
        graph: GraphPaths,
        #[command(flatten)]
        codebooks: CodebookPaths,
    },

    /// Populate the inverted lists from the paired groups/ids streams.
    Add {
        /// Groups stream: per centroid, `i32` size then the vectors.
        #[arg(long)]
        groups: PathBuf,
        /// Ids stream: per centroid, `i32` size then the external ids.
        #[arg(long)]
        ids: PathBuf,
        /// Output index file.
        #[arg(long, default_value = "index.strata")]
        out: PathBuf,
        #[command(flatten)]
        graph: GraphPaths,
        #[command(flatten)]
        codebooks: CodebookPaths,
    },

    /// Query a finished index.
    Search {
        /// Raw little-endian `f32[n * dimension]` query file.
        #[arg(long)]
        queries: PathBuf,
        /// Index file written by `add`.
        #[arg(long, default_value = "index.strata")]
        index: PathBuf,
        /// Neighbors per query.
        #[arg(long, default_value_t = 10)]
        k: usize,
        /// Override the configured probe count.
        #[arg(long)]
        nprobe: Option<usize>,
        /// Override the configured scanned-candidate budget.
        #[arg(long)]
        max_codes: Option<usize>,
        #[command(flatten)]
        graph: GraphPaths,
        #[command(flatten)]
        codebooks: CodebookPaths,
    },

    /// Print summary statistics of a finished index.
    Info {
        /// Index file written by `add`.
        #[arg(long, default_value = "index.strata")]
        index: PathBuf,
        #[command(flatten)]
        graph: GraphPaths,
        #[command(flatten)]
        codebooks: CodebookPaths,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = StrataConfig::load(&cli.config).context("loading configuration")?;

    match cli.command {
        Command::BuildQuantizer { centroids, graph } => {
            let started = Instant::now();
            StrataIndex::build_quantizer(
                &config.index,
                &config.search,
                &centroids,
                &graph.info,
                &graph.edges,
            )?;
            tracing::info!(elapsed = ?started.elapsed(), "quantizer ready");
        }

        Command::Train {
            learn,
            graph,
            codebooks,
        } => {
            let quantizer = load_quantizer(&config, &graph)?;
            let mut index =
                StrataIndex::new(config.index.clone(), config.search.clone(), quantizer)?;

            let rows = read_row_file(&learn, config.index.dimension)?;
            tracing::info!(rows = rows.len() / config.index.dimension, "learn set loaded");

            let started = Instant::now();
            index.train_residual_pq(&rows)?;
            index.train_norm_pq(&rows)?;
            tracing::info!(elapsed = ?started.elapsed(), "codebooks trained");

            index.pq().save(&codebooks.pq)?;
            index.norm_pq().save(&codebooks.norm_pq)?;
        }

        Command::Add {
            groups,
            ids,
            out,
            graph,
            codebooks,
        } => {
            let quantizer = load_quantizer(&config, &graph)?;
            let mut index =
                StrataIndex::new(config.index.clone(), config.search.clone(), quantizer)?;
            index.set_pq(ProductQuantizer::load(&codebooks.pq)?)?;
            index.set_norm_pq(ProductQuantizer::load(&codebooks.norm_pq)?)?;

            let started = Instant::now();
            index.add(&groups, &ids)?;
            tracing::info!(
                points = index.num_points(),
                elapsed = ?started.elapsed(),
                "index populated"
            );

            index.write(&out)?;
            tracing::info!(path = %out.display(), "index written");
        }

        Command::Search {
            queries,
            index,
            k,
            nprobe,
            max_codes,
            graph,
            codebooks,
        } => {
            let mut loaded = load_index(&config, &index, &graph, &codebooks)?;
            if let Some(nprobe) = nprobe {
                loaded.set_nprobe(nprobe);
            }
            if let Some(max_codes) = max_codes {
                loaded.set_max_codes(max_codes);
            }

            let dimension = loaded.config().dimension;
            let query_rows = read_row_file(&queries, dimension)?;
            let n = query_rows.len() / dimension;

            let bar = ProgressBar::new(n as u64).with_style(
                ProgressStyle::with_template("{bar:40} {pos}/{len} queries ({eta})")?,
            );

            let started = Instant::now();
            for (q, query) in query_rows.chunks_exact(dimension).enumerate() {
                let hits = loaded.search(query, k)?;
                let line: Vec<String> = hits
                    .iter()
                    .map(|(dist, id)| format!("{id}:{dist:.4}"))
                    .collect();
                bar.suspend(|| println!("query {q}: {}", line.join(" ")));
                bar.inc(1);
            }
            bar.finish_and_clear();

            let elapsed = started.elapsed();
            tracing::info!(
                queries = n,
                elapsed = ?elapsed,
                per_query = ?elapsed.checked_div(n as u32).unwrap_or_default(),
                "search finished"
            );
        }

        Command::Info {
            index,
            graph,
            codebooks,
        } => {
            let loaded = load_index(&config, &index, &graph, &codebooks)?;
            let config = loaded.config();
            println!("dimension:     {}", config.dimension);
            println!("centroids:     {}", config.centroids);
            println!("subcentroids:  {}", config.subcentroids);
            println!("code bytes:    {}", config.code_bytes);
            println!("points:        {}", loaded.num_points());
            println!("nprobe:        {}", loaded.nprobe());
            println!("max codes:     {}", loaded.max_codes());
        }
    }

    Ok(())
}

fn load_quantizer(config: &StrataConfig, graph: &GraphPaths) -> Result<Arc<CoarseQuantizer>> {
    let quantizer = CoarseQuantizer::load(&graph.info, &graph.edges)
        .context("loading coarse quantizer; run build-quantizer first")?;
    quantizer.set_ef(config.search.ef);
    Ok(Arc::new(quantizer))
}

fn load_index(
    config: &StrataConfig,
    index_path: &Path,
    graph: &GraphPaths,
    codebooks: &CodebookPaths,
) -> Result<StrataIndex> {
    let quantizer = load_quantizer(config, graph)?;
    let pq = ProductQuantizer::load(&codebooks.pq).context("loading residual codebooks")?;
    let norm_pq = ProductQuantizer::load(&codebooks.norm_pq).context("loading norm codebook")?;
    let index = StrataIndex::read(index_path, quantizer, pq, norm_pq, config.search.clone())
        .context("loading index")?;
    Ok(index)
}

/// Reads a raw `f32` row file, inferring the row count from its size.
fn read_row_file(path: &Path, dimension: usize) -> Result<Vec<f32>> {
    let bytes = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len() as usize;
    if bytes % (dimension * 4) != 0 {
        bail!(
            "{} holds {bytes} bytes, not a whole number of {dimension}-float rows",
            path.display()
        );
    }
    let rows = bytes / (dimension * 4);
    Ok(reader::read_raw_vectors(path, dimension, rows)?)
}
