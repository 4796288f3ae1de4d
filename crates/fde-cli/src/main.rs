//! CLI for fixed dimensional encodings.

// CLI binaries need to print user-facing output
#![allow(
    clippy::print_stdout,
    reason = "CLI binary needs stdout for user output"
)]

use eyre::WrapErr as _;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Encode {
            input,
            store,
            mode,
            workers,
            config,
        } => {
            encode(&input, &store, mode, workers, &config)?;
        }
        Command::Search {
            query,
            store,
            limit,
            rerank,
            json,
        } => {
            search(&query, &store, limit, rerank.as_deref(), json)?;
        }
        Command::Inspect { store, config } => {
            inspect(store.as_deref(), &config)?;
        }
    }

    Ok(())
}

use clap::Parser as _;

#[derive(clap::Parser)]
#[command(name = "fde")]
#[command(about = "Fixed dimensional encodings - single-vector search over multi-vector sets")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Encode vector sets from a JSON file into a store
    Encode {
        /// JSON array of `{"id": ..., "vectors": [[...], ...]}` records
        input: std::path::PathBuf,

        /// Store directory (created if missing)
        #[arg(short, long)]
        store: std::path::PathBuf,

        /// Aggregation to apply
        #[arg(short, long, value_enum, default_value_t = Mode::Document)]
        mode: Mode,

        /// Worker threads; 0 encodes on the calling thread
        #[arg(short, long, default_value = "0")]
        workers: usize,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Rank stored documents against a query vector set
    Search {
        /// JSON array of query vectors
        query: std::path::PathBuf,

        /// Store directory
        #[arg(short, long)]
        store: std::path::PathBuf,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Source JSON of the stored documents; rescores candidates with exact Chamfer similarity
        #[arg(long)]
        rerank: Option<std::path::PathBuf>,

        /// Output detailed JSON with encoding and Chamfer scores
        #[arg(long)]
        json: bool,
    },

    /// Print a config, its fingerprint and encoding sizes
    Inspect {
        /// Store directory to read the config from
        #[arg(short, long, conflicts_with = "encoding_config")]
        store: Option<std::path::PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Mode {
    /// Per-partition sums
    Query,
    /// Per-partition averages
    Document,
}

impl From<Mode> for fde_core::EncodingType {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Query => Self::Sum,
            Mode::Document => Self::Average,
        }
    }
}

/// Encoding config sources: an optional JSON file, then flag overrides.
#[derive(clap::Args)]
#[group(id = "encoding_config", multiple = true)]
struct ConfigArgs {
    /// JSON encoding config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Token vector dimension
    #[arg(long)]
    dimension: Option<usize>,

    /// Number of repetitions
    #[arg(long)]
    repetitions: Option<usize>,

    /// SimHash hyperplanes per repetition
    #[arg(long)]
    simhash_projections: Option<u32>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Project each vector to this many dimensions with an AMS sketch
    #[arg(long)]
    ams_sketch: Option<usize>,

    /// Compress the concatenated encoding to this length with a count sketch
    #[arg(long)]
    final_projection: Option<usize>,
}

impl ConfigArgs {
    fn resolve(&self) -> eyre::Result<fde_core::EncodingConfig> {
        let mut config = match &self.config {
            Some(path) => read_json::<fde_core::EncodingConfig>(path)?,
            None => fde_core::EncodingConfig::default(),
        };

        if let Some(dimension) = self.dimension {
            config.dimension = dimension;
        }
        if let Some(repetitions) = self.repetitions {
            config = config.with_repetitions(repetitions);
        }
        if let Some(k) = self.simhash_projections {
            config = config.with_simhash_projections(k);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(p) = self.ams_sketch {
            config = config.with_ams_sketch(p);
        }
        if let Some(f) = self.final_projection {
            config = config.with_final_projection(f);
        }

        config.validate().wrap_err("invalid encoding config")?;
        Ok(config)
    }
}

/// One vector set of an input file.
#[derive(serde::Deserialize)]
struct Record {
    id: String,
    vectors: fde_core::VectorSet,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> eyre::Result<T> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).wrap_err_with(|| format!("failed to parse {}", path.display()))
}

fn encode(
    input: &std::path::Path,
    store_path: &std::path::Path,
    mode: Mode,
    workers: usize,
    config_args: &ConfigArgs,
) -> eyre::Result<()> {
    let config = config_args.resolve()?;
    let records: Vec<Record> = read_json(input)?;
    eprintln!(
        "Encoding {} vector sets from {} -> {}",
        records.len(),
        input.display(),
        store_path.display()
    );

    let mut store = fde_store::EncodingStore::open(store_path, &config)
        .wrap_err_with(|| format!("failed to open store at {}", store_path.display()))?;

    // Skip records already in the store
    let (ids, vector_sets): (Vec<String>, Vec<fde_core::VectorSet>) = records
        .into_iter()
        .filter(|record| !store.contains(&record.id))
        .map(|record| (record.id, record.vectors))
        .unzip();

    let encoder = fde_encode::FdeEncoder::new(config).wrap_err("failed to build encoder")?;
    let batch_config = fde_batch::BatchConfig {
        num_workers: workers,
        ..fde_batch::BatchConfig::default()
    };
    let driver = fde_batch::BatchDriver::new(&encoder, batch_config);

    let report = |completed: usize, total: usize| {
        if completed % 100 == 0 || completed == total {
            eprintln!("Encoded {completed}/{total} vector sets...");
        }
    };
    let results = if workers > 0 {
        driver.encode_batch_parallel(&vector_sets, mode.into(), report)
    } else {
        driver.encode_batch(&vector_sets, mode.into(), report)
    }
    .wrap_err("batch encoding failed")?;

    let mut stored = 0;
    let mut rejected = 0;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(encoding) => {
                store
                    .store(id, &encoding)
                    .wrap_err_with(|| format!("failed to store encoding for {id}"))?;
                stored += 1;
            }
            Err(e) => {
                tracing::warn!(%id, %e, "skipping vector set");
                rejected += 1;
            }
        }
    }
    store.flush().wrap_err("failed to flush store")?;

    tracing::info!(stored, rejected, total = store.len(), "encoding finished");
    println!(
        "Stored {stored} encodings ({rejected} rejected, {} in store)",
        store.len()
    );

    Ok(())
}

/// JSON output for detailed search results.
#[derive(serde::Serialize)]
struct JsonResult {
    id: String,
    fde_score: f32,
    chamfer_score: Option<f32>,
}

/// Candidates to score by encoding; reranking looks at three times as many.
fn candidate_limit(limit: usize, rerank: bool) -> usize {
    if rerank {
        limit.saturating_mul(3)
    } else {
        limit
    }
}

fn search(
    query_path: &std::path::Path,
    store_path: &std::path::Path,
    limit: usize,
    rerank: Option<&std::path::Path>,
    json: bool,
) -> eyre::Result<()> {
    let mut store = fde_store::EncodingStore::open_existing(store_path)
        .wrap_err_with(|| format!("failed to open store at {}", store_path.display()))?;
    let query: fde_core::VectorSet = read_json(query_path)?;

    let encoder =
        fde_encode::FdeEncoder::new(store.config().clone()).wrap_err("failed to build encoder")?;
    let query_encoding = encoder
        .encode_query(&query)
        .wrap_err("failed to encode query")?;

    let fetch_limit = candidate_limit(limit, rerank.is_some());
    let candidates = fde_encode::rank(&query_encoding, store.entries()?, fetch_limit)
        .wrap_err("failed to score documents")?;

    let mut results: Vec<JsonResult> = candidates
        .into_iter()
        .map(|candidate| JsonResult {
            id: candidate.doc_id,
            fde_score: candidate.score,
            chamfer_score: None,
        })
        .collect();

    if let Some(source) = rerank {
        let documents: std::collections::HashMap<String, fde_core::VectorSet> =
            read_json::<Vec<Record>>(source)?
                .into_iter()
                .map(|record| (record.id, record.vectors))
                .collect();

        for result in &mut results {
            let Some(document) = documents.get(&result.id) else {
                tracing::debug!(id = %result.id, "no source vectors for candidate");
                continue;
            };
            let score = fde_encode::chamfer_similarity(&query, document)
                .wrap_err_with(|| format!("failed to compute Chamfer score for {}", result.id))?;
            result.chamfer_score = Some(score);
        }

        results.sort_by(|a, b| {
            let a = a.chamfer_score.unwrap_or(f32::NEG_INFINITY);
            let b = b.chamfer_score.unwrap_or(f32::NEG_INFINITY);
            b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    results.truncate(limit);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).wrap_err("failed to serialize JSON")?
        );
    } else {
        for result in &results {
            match result.chamfer_score {
                Some(chamfer) => {
                    println!("{}: {chamfer:.4} (fde {:.4})", result.id, result.fde_score);
                }
                None => println!("{}: {:.4}", result.id, result.fde_score),
            }
        }
    }

    Ok(())
}

/// JSON output for `inspect`.
#[derive(serde::Serialize)]
struct Inspection<'a> {
    config: &'a fde_core::EncodingConfig,
    fingerprint: String,
    num_partitions: usize,
    projection_dim: usize,
    concatenated_len: usize,
    encoding_len: usize,
    stored: Option<usize>,
}

fn inspect(store_path: Option<&std::path::Path>, config_args: &ConfigArgs) -> eyre::Result<()> {
    let (config, stored) = match store_path {
        Some(path) => {
            let store = fde_store::EncodingStore::open_existing(path)
                .wrap_err_with(|| format!("failed to open store at {}", path.display()))?;
            (store.config().clone(), Some(store.len()))
        }
        None => (config_args.resolve()?, None),
    };

    let inspection = Inspection {
        config: &config,
        fingerprint: config.fingerprint().to_hex(),
        num_partitions: config.num_partitions(),
        projection_dim: config.projection_dim(),
        concatenated_len: config.concatenated_len(),
        encoding_len: config.encoding_len(),
        stored,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&inspection).wrap_err("failed to serialize JSON")?
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory as _;
        Args::command().debug_assert();
    }

    #[test]
    fn test_inspect_store_rejects_config_flags() {
        assert!(Args::try_parse_from(["fde", "inspect", "--store", "db"]).is_ok());
        assert!(Args::try_parse_from(["fde", "inspect", "--seed", "7"]).is_ok());
        assert!(Args::try_parse_from(["fde", "inspect", "--store", "db", "--seed", "7"]).is_err());
        assert!(
            Args::try_parse_from(["fde", "inspect", "--store", "db", "--config", "c.json"])
                .is_err()
        );
    }

    #[test]
    fn test_encode_accepts_config_flags() {
        let args = Args::try_parse_from([
            "fde", "encode", "in.json", "--store", "db", "--dimension", "16", "--seed", "3",
        ])
        .unwrap();
        let Command::Encode { config, .. } = args.command else {
            panic!("expected encode command");
        };
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.dimension, 16);
        assert_eq!(resolved.seed, 3);
    }

    #[test]
    fn test_candidate_limit_saturates() {
        assert_eq!(candidate_limit(10, false), 10);
        assert_eq!(candidate_limit(10, true), 30);
        assert_eq!(candidate_limit(usize::MAX, true), usize::MAX);
    }
}
