mod image_helper;

use anyhow::{Context, Result, bail};
use clap::Parser;
use image_helper::image_helper::{file_stem, save};
use nanospot::logging::init_tracing;
use nanospot::{
    AcquisitionFormat, AcquisitionHeader, AppState, DisplayMode, FixedThreshold, HeightGrid,
    ImageOperation, Ink, MeasurementConfig, OtsuThreshold, ResultRow, SourceData,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Measures spots on greyscale height images and writes labelled overlays.
#[derive(Debug, Parser)]
#[command(name = "nanospot_inspector", version)]
struct Args {
    /// Greyscale images; one per sample, or the frames of one stack for `mpp`.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// JSON file holding the acquisition header.
    #[arg(long)]
    header: PathBuf,

    /// Acquisition format tag: s94, stp or mpp.
    #[arg(long)]
    format: AcquisitionFormat,

    /// Fixed binary threshold level. Otsu is used when omitted.
    #[arg(long)]
    threshold: Option<u8>,

    /// TOML file with measurement settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory overlays and results are written to.
    #[arg(long, default_value = "nanospot_out")]
    out: PathBuf,

    /// Run per-frame analysis on a worker pool.
    #[arg(long)]
    parallel: bool,

    /// Also render each sample with this region index highlighted.
    #[arg(long)]
    select: Option<usize>,

    /// Use white as the base ink for selection renders.
    #[arg(long)]
    white: bool,
}

fn load_grid(path: &Path) -> Result<HeightGrid> {
    let image = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .to_luma8();
    let (width, height) = image.dimensions();
    let values = image.pixels().map(|p| p[0] as f64).collect();
    Ok(HeightGrid::new(height as usize, width as usize, values)?)
}

fn sources(args: &Args, header: AcquisitionHeader) -> Result<Vec<SourceData>> {
    if args.format.is_multi_frame() {
        let frames = args
            .images
            .iter()
            .map(|p| load_grid(p))
            .collect::<Result<Vec<_>>>()?;
        return Ok(vec![SourceData {
            file_name: args.images[0].clone(),
            header,
            frames,
        }]);
    }

    args.images
        .iter()
        .map(|p| {
            Ok(SourceData {
                file_name: p.clone(),
                header: header.clone(),
                frames: vec![load_grid(p)?],
            })
        })
        .collect()
}

fn print_tracking(state: &AppState) {
    for sample in state.samples() {
        let Some(tracking) = sample.measurements().and_then(|m| m.tracking.as_ref()) else {
            continue;
        };
        println!(
            "{}: {} spot(s) matched to the previous frame, {} new",
            sample.name(),
            tracking.matched.len(),
            tracking.new_indices.len()
        );
    }
}

fn print_table(view: &[(String, Vec<ResultRow>)]) {
    println!("{:<24} {:>5} {:>14} {:>14} {:>8}", "sample", "label", "area_nm2", "distance_nm", "neighbor");
    for (sample, rows) in view {
        for row in rows {
            println!(
                "{:<24} {:>5} {:>14.3} {:>14.3} {:>8}",
                sample, row.display_id, row.physical_area, row.physical_neighbor_distance, row.neighbor_display_id
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => MeasurementConfig::from_file(path)?,
        None => MeasurementConfig::default(),
    };
    let header_text = std::fs::read_to_string(&args.header)
        .with_context(|| format!("failed to read header {}", args.header.display()))?;
    let header = AcquisitionHeader::new(serde_json::from_str(&header_text)?);

    // --- 2. Ingestion ---
    let mut state = AppState::new(config);
    let count = state.ingest(sources(&args, header)?, args.format)?;
    info!(count, "samples loaded");

    // --- 3. Thresholding & Detection ---
    let threshold: Box<dyn ImageOperation> = match args.threshold {
        Some(level) => Box::new(FixedThreshold(level)),
        None => Box::new(OtsuThreshold),
    };
    state.apply_operation_all(threshold.as_ref())?;

    if args.parallel {
        state.run_detection_parallel().await?;
    } else {
        state.run_detection()?;
    }

    // --- 4. Output ---
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let base = if args.white { Ink::White } else { Ink::Black };
    for sample in state.samples() {
        let stem = file_stem(sample.name());
        for (mode, suffix) in [(DisplayMode::Contours, "contours"), (DisplayMode::WContours, "wcontours")] {
            let Some(image) = sample.display_image(mode) else {
                bail!("sample {} has no {} overlay", sample.name(), mode);
            };
            save(&args.out.join(format!("{stem}_{suffix}.png")), image)?;
        }
        if let Some(index) = args.select {
            let image = state.render_selection(sample.name(), index, base)?;
            save(&args.out.join(format!("{stem}_selected_{index}.png")), &image)?;
        }
    }

    let view = state.results_view();
    let json: BTreeMap<&str, &Vec<ResultRow>> = view.iter().map(|(n, r)| (n.as_str(), r)).collect();
    std::fs::write(args.out.join("results.json"), serde_json::to_string_pretty(&json)?)?;

    print_table(&view);
    print_tracking(&state);
    info!(out = %args.out.display(), "results written");
    Ok(())
}
