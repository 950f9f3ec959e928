/// Batch pipeline runner: loads serialized predictor/response stacks, tunes
/// (optionally), trains per-tile models and writes the composited mosaics
/// plus accuracy and attribution artifacts as JSON, keyed by response.
///
/// Stacks are JSON-serialized `PredictorStack` values with sentinel nodata
/// (JSON has no NaN); the sentinel is masked on load and restored on write.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use canopy_core::forest::Hyperparams;
use canopy_core::importance::{ablate_tile, aggregate_group_importances};
use canopy_core::pipeline::{run_pipeline, MapperConfig};
use canopy_core::predictors::ResponseVar;
use canopy_core::raster::PredictorStack;
use canopy_core::samples::{build_samples, collect_limited};
use canopy_core::selection::select_tiles;
use canopy_core::grid::build_partitions;
use canopy_core::trainer::TileRecord;
use canopy_core::tuning::{tune_response, TunerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "mapper",
    about = "Tile-based canopy-structure mapping: train, composite, attribute"
)]
struct Args {
    /// Predictor stack JSON (sentinel nodata).
    #[arg(long)]
    predictors: PathBuf,

    /// Response stack JSON; band names must be response-variable names.
    #[arg(long)]
    responses: PathBuf,

    /// Pipeline config JSON (MapperConfig); defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tuned hyperparameters JSON: list of (response name, Hyperparams).
    /// Ignored when --tune is set.
    #[arg(long)]
    hyperparams: Option<PathBuf>,

    /// Run the coarse-to-fine tuner before training.
    #[arg(long)]
    tune: bool,

    /// Sample cap for the tuning feature table.
    #[arg(long, default_value = "2000")]
    tune_samples: usize,

    /// Comma-separated response names (default: every band in the stack).
    #[arg(long)]
    response_names: Option<String>,

    /// Drawings for the per-tile group-ablation study (0 = skip).
    #[arg(long, default_value = "0")]
    ablate_drawings: usize,

    /// Sample cap per ablation drawing.
    #[arg(long, default_value = "1000")]
    ablate_samples: usize,

    /// Nodata sentinel in the input stacks.
    #[arg(long, default_value = "-9999", allow_hyphen_values = true)]
    nodata: f32,

    /// Output directory (created if absent).
    #[arg(short, long, default_value = "out")]
    output: PathBuf,
}

/// Accuracy record without the raster fragment, for the keyed JSON artifact.
#[derive(Serialize)]
struct AccuracyOut {
    tile_id: u32,
    response: ResponseVar,
    rmse: f64,
    r2: Option<f64>,
    n_train: usize,
    n_test: usize,
    importances: Vec<(String, f64)>,
}

impl From<&TileRecord> for AccuracyOut {
    fn from(r: &TileRecord) -> Self {
        Self {
            tile_id: r.tile_id,
            response: r.response,
            rmse: r.rmse,
            r2: r.r2,
            n_train: r.n_train,
            n_test: r.n_test,
            importances: r.importances.clone(),
        }
    }
}

fn load_stack(path: &PathBuf, nodata: f32) -> Result<PredictorStack> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading stack {}", path.display()))?;
    let mut stack: PredictorStack =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    for band in &mut stack.bands {
        band.mask_sentinel(nodata);
    }
    Ok(stack)
}

fn resolve_responses(args: &Args, response_stack: &PredictorStack) -> Result<Vec<ResponseVar>> {
    let names: Vec<String> = match &args.response_names {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => response_stack.names.clone(),
    };
    let mut out = Vec::with_capacity(names.len());
    for name in &names {
        match ResponseVar::from_name(name) {
            Some(v) => out.push(v),
            None => bail!("unknown response variable {name:?}"),
        }
    }
    if out.is_empty() {
        bail!("no response variables requested");
    }
    Ok(out)
}

fn write_json<T: Serialize>(dir: &PathBuf, name: &str, value: &T) -> Result<()> {
    let path = dir.join(name);
    let text = serde_json::to_string(value).with_context(|| format!("serializing {name}"))?;
    fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Build the domain-wide tuning feature table: deterministic per-tile caps,
/// concatenated over the tiles that pass the density gate.
fn tuning_table(
    predictors: &PredictorStack,
    response_stack: &PredictorStack,
    responses: &[ResponseVar],
    config: &MapperConfig,
    cap: usize,
) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    let partitions = build_partitions(predictors.extent(), &config.partition_config())?;
    let names: Vec<&str> = responses.iter().map(ResponseVar::name).collect();
    let samples = build_samples(predictors, response_stack, &names, &partitions.tiles)?;
    let selection = select_tiles(
        &partitions.tiles,
        &partitions.grid_cells,
        &samples,
        &config.thresholds(),
    );

    let per_tile = (cap / selection.selected.len().max(1)).max(1);
    let mut features = Vec::new();
    let mut targets: Vec<Vec<f64>> = vec![Vec::new(); responses.len()];
    for sel in &selection.selected {
        for s in collect_limited(&samples, sel.tile.id, per_tile) {
            features.push(s.predictors.clone());
            for (slot, t) in targets.iter_mut().enumerate() {
                t.push(s.responses[slot]);
            }
        }
    }
    if features.is_empty() {
        bail!("no tiles passed selection; nothing to tune on");
    }
    Ok((features, targets))
}

fn main() -> Result<()> {
    let args = Args::parse();
    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let predictors = load_stack(&args.predictors, args.nodata)?;
    let response_stack = load_stack(&args.responses, args.nodata)?;
    let responses = resolve_responses(&args, &response_stack)?;

    let config: MapperConfig = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text).context("parsing pipeline config")?
        }
        None => MapperConfig::default(),
    };

    // Hyperparameters: tuner run, explicit file, or defaults.
    let tuned: Vec<(ResponseVar, Hyperparams)> = if args.tune {
        let (features, targets) = tuning_table(
            &predictors,
            &response_stack,
            &responses,
            &config,
            args.tune_samples,
        )?;
        let tuner_config = TunerConfig {
            base_seed: config.seed,
            ..TunerConfig::default()
        };
        let mut tuned = Vec::with_capacity(responses.len());
        for (slot, &response) in responses.iter().enumerate() {
            eprintln!("tuning {} on {} samples", response.name(), features.len());
            let outcome =
                tune_response(&features, &targets[slot], response, &tuner_config, &[])?;
            write_json(
                &args.output,
                &format!("tuning_{}.json", response.name()),
                &outcome,
            )?;
            tuned.push((response, outcome.best));
        }
        tuned
    } else if let Some(path) = &args.hyperparams {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading hyperparams {}", path.display()))?;
        let named: Vec<(String, Hyperparams)> =
            serde_json::from_str(&text).context("parsing hyperparams")?;
        named
            .into_iter()
            .map(|(name, hp)| {
                ResponseVar::from_name(&name)
                    .map(|v| (v, hp))
                    .with_context(|| format!("unknown response {name:?} in hyperparams"))
            })
            .collect::<Result<_>>()?
    } else {
        responses.iter().map(|&r| (r, Hyperparams::default())).collect()
    };

    eprintln!(
        "running pipeline: {} responses, {}x{} px domain",
        responses.len(),
        predictors.width(),
        predictors.height()
    );
    let result = run_pipeline(&predictors, &response_stack, &responses, &tuned, &config)?;

    eprintln!(
        "selected {} of {} tiles ({} dropped), {} samples",
        result.selection.selected.len(),
        result.partitions.tiles.len(),
        result.selection.dropped.len(),
        result.n_samples
    );
    write_json(&args.output, "selection.json", &result.selection)?;

    let mut all_records: Vec<&TileRecord> = Vec::new();
    for mosaic in &result.mosaics {
        let name = mosaic.response.name();
        for (tile_id, reason) in &mosaic.failures {
            eprintln!("{name}: tile {tile_id} failed: {reason}");
        }

        let accuracy: Vec<AccuracyOut> = mosaic.records.iter().map(AccuracyOut::from).collect();
        write_json(&args.output, &format!("records_{name}.json"), &accuracy)?;
        write_json(
            &args.output,
            &format!("mosaic_{name}_weighted.json"),
            &mosaic.composite.weighted.fill_nodata(args.nodata),
        )?;
        write_json(
            &args.output,
            &format!("mosaic_{name}_unweighted.json"),
            &mosaic.composite.unweighted.fill_nodata(args.nodata),
        )?;
        all_records.extend(mosaic.records.iter());
        eprintln!(
            "{name}: {} tile records, {} excluded from weighting",
            mosaic.records.len(),
            mosaic.composite.excluded_tiles.len()
        );
    }

    let owned: Vec<TileRecord> = all_records.into_iter().cloned().collect();
    let groups = aggregate_group_importances(&owned);
    write_json(&args.output, "group_importance.json", &groups)?;

    if args.ablate_drawings > 0 {
        let names: Vec<&str> = responses.iter().map(ResponseVar::name).collect();
        let samples =
            build_samples(&predictors, &response_stack, &names, &result.partitions.tiles)?;
        for (slot, &response) in responses.iter().enumerate() {
            let hp = tuned
                .iter()
                .find(|(r, _)| *r == response)
                .map(|(_, h)| *h)
                .unwrap_or_default();
            let mut per_tile = Vec::new();
            for sel in &result.selection.selected {
                let subset =
                    collect_limited(&samples, sel.tile.id, config.max_samples_per_tile);
                let features: Vec<Vec<f64>> =
                    subset.iter().map(|s| s.predictors.clone()).collect();
                let targets: Vec<f64> = subset.iter().map(|s| s.responses[slot]).collect();
                let outcomes = ablate_tile(
                    &features,
                    &targets,
                    &predictors.names,
                    &hp,
                    args.ablate_drawings,
                    args.ablate_samples,
                    sel.tile.id,
                    config.seed,
                )?;
                per_tile.push((sel.tile.id, outcomes));
            }
            write_json(
                &args.output,
                &format!("ablation_{}.json", response.name()),
                &per_tile,
            )?;
            eprintln!(
                "{}: ablation over {} tiles, {} drawings each",
                response.name(),
                per_tile.len(),
                args.ablate_drawings
            );
        }
    }

    eprintln!("artifacts written to {}", args.output.display());
    Ok(())
}
