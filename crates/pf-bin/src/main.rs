//! Panelfab entrypoint: merge several Gerber/Excellon board jobs into one
//! fabrication panel.
use anyhow::{bail, Context, Result};
use clap::Parser;
use core_job::{GlobalState, ToolTable};
use core_merge::{merge, MergeReport, OctagonStyle, PANEL_ORIGIN};
use core_pack::{
    pack_exhaustive, pack_random, CancelToken, PackItem, PackProgress, PackRequest, RandomOptions,
};
use core_place::{parse_layout, JobRegistry, Placement};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;

/// Octagon rendering style for the `OC8` prelude macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OctagonArg {
    /// 22.5° vertices (default).
    Normal,
    /// 0.0° vertices.
    Rotate,
}

impl From<OctagonArg> for OctagonStyle {
    fn from(arg: OctagonArg) -> Self {
        match arg {
            OctagonArg::Normal => OctagonStyle::Normal,
            OctagonArg::Rotate => OctagonStyle::Rotated,
        }
    }
}

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "panelfab",
    version,
    about = "Merge multiple Gerber/Excellon jobs into a single fab panel"
)]
struct Args {
    /// Panel configuration file (TOML).
    pub config: PathBuf,
    /// Optional manual layout file (rows of job names; `!` suffix rotates).
    pub layout: Option<PathBuf>,

    /// Automatic placement using random search (the default).
    #[arg(long = "random-search", conflicts_with_all = ["full_search", "place_file"])]
    pub random_search: bool,
    /// Automatic placement using exhaustive search.
    #[arg(long = "full-search", conflicts_with = "place_file")]
    pub full_search: bool,
    /// Read the placement from a previously written placement file.
    #[arg(long = "place-file", value_name = "FILE")]
    pub place_file: Option<PathBuf>,

    /// Jobs to tile exhaustively for each random placement.
    #[arg(long = "rs-fsjobs", value_name = "N", default_value_t = 2)]
    pub rs_fsjobs: usize,
    /// Random search budget in seconds (0 = run until interrupted).
    #[arg(long = "search-timeout", value_name = "T", default_value_t = 5)]
    pub search_timeout: u64,
    /// Random search seed; defaults to entropy. Recorded so a run can be
    /// reproduced.
    #[arg(long = "seed")]
    pub seed: Option<u64>,
    /// Random search worker threads.
    #[arg(long = "workers", value_name = "N", default_value_t = 1)]
    pub workers: usize,

    /// Octagon style for emitted headers.
    #[arg(long = "octagons", value_enum, default_value_t = OctagonArg::Normal)]
    pub octagons: OctagonArg,
    /// Do not trim Gerber data to the board outline extents.
    #[arg(long = "no-trim-gerber")]
    pub no_trim_gerber: bool,
    /// Do not trim Excellon data to the board outline extents.
    #[arg(long = "no-trim-excellon")]
    pub no_trim_excellon: bool,
}

fn configure_logging() -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(".", "panelfab.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Some(guard),
        // A global subscriber is already installed (tests); drop the guard
        // so the writer shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!(target: "runtime.panic", ?panic_info, "panic");
            default_panic(panic_info);
        }));
    });
}

/// Spawn the fire-and-forget progress consumer (stands in for the GUI
/// collaborator; updates never block the search).
fn spawn_progress_logger() -> (
    crossbeam_channel::Sender<PackProgress>,
    std::thread::JoinHandle<()>,
) {
    let (tx, rx) = crossbeam_channel::bounded::<PackProgress>(16);
    let handle = std::thread::spawn(move || {
        for update in rx.iter() {
            debug!(
                target: "pack.progress",
                tried = update.placements_tried,
                best = ?update.best_extent,
                "search_progress"
            );
        }
    });
    (tx, handle)
}

fn auto_place(
    args: &Args,
    config: &core_config::Config,
    registry: &JobRegistry,
    origin: (f64, f64),
) -> Result<Placement> {
    let panel = &config.panel;
    let mut items = Vec::new();
    for (name, pair) in registry.iter() {
        for _ in 0..pair.native.repeat {
            items.push(PackItem {
                name: name.clone(),
                width: pair.native.width(),
                height: pair.native.height(),
            });
        }
    }
    let request = PackRequest::new(
        items,
        panel.width - panel.leftmargin - panel.rightmargin,
        panel.height - panel.bottommargin - panel.topmargin,
        panel.xspacing,
        panel.yspacing,
    );

    let cancel = CancelToken::new();
    let (progress_tx, progress_handle) = spawn_progress_logger();
    let tiling = if args.full_search {
        println!("Performing exhaustive layout ...");
        pack_exhaustive(&request, &cancel, Some(&progress_tx))
    } else {
        let seed = args.seed.unwrap_or_else(rand::random);
        println!(
            "Performing random layout (seed {}, timeout {}s) ...",
            seed, args.search_timeout
        );
        info!(target: "pack", seed, "random_search_seed");
        let options = RandomOptions {
            exhaustive_jobs: args.rs_fsjobs,
            timeout: Duration::from_secs(args.search_timeout),
            seed,
            workers: args.workers.max(1),
            max_iterations: None,
        };
        pack_random(&request, &options, &cancel, Some(&progress_tx))
    };
    drop(progress_tx);
    let _ = progress_handle.join();

    let tiling = tiling?;
    let placement = Placement::from_tiling(&tiling, request.items(), registry, origin.0, origin.1)?;
    Ok(placement)
}

fn print_report(report: &MergeReport) {
    println!("{}", "-".repeat(50));
    println!(
        "     Job Size : {:.3}\" x {:.3}\"",
        report.panel_size.0, report.panel_size.1
    );
    println!("     Job Area : {:.2} sq. in.", report.panel_area);
    println!("   Area Usage : {:.1}%", report.utilization());
    println!("   Drill hits : {}", report.drill_hits);
    println!("Drill density : {:.1} hits/sq.in.", report.drill_density());
    println!();
    println!("Tool List:");
    for (code, diameter, hits) in &report.per_tool_hits {
        if *hits > 0 {
            println!("  {} {:.4}\" {:5} hits", code, diameter, hits);
        }
    }
    if let Some(smallest) = report.smallest_drill {
        println!("Smallest Tool: {:.4}in", smallest);
    }
    println!();
    println!("Output Files :");
    for file in &report.output_files {
        println!("   {}", file.display());
    }
}

fn run(args: &Args) -> Result<()> {
    let config = core_config::load(&args.config)?;
    let base_dir = args
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    println!("Reading job files ...");
    let mut state = GlobalState::default();
    let mut jobs = core_parse::load_jobs(&config, &mut state, &base_dir)?;

    for job in jobs.values_mut() {
        job.shift_to_positive();
    }
    for job in jobs.values() {
        let bounds = job.bounding_box();
        print!("Job {}:", job.name);
        if job.repeat > 1 {
            print!(" ({} instances)", job.repeat);
        }
        println!();
        println!(
            "  Extents: ({:.3},{:.3})-({:.3},{:.3})",
            bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
        );
        println!("  Size: {:.4}\" x {:.4}\"", job.width(), job.height());
    }

    if !args.no_trim_excellon {
        println!("Trimming Excellon data to board outlines ...");
        for job in jobs.values_mut() {
            job.trim_excellon();
        }
    }
    if !args.no_trim_gerber {
        println!("Trimming Gerber data to board outlines ...");
        for job in jobs.values_mut() {
            job.trim_gerber();
        }
    }

    // Global tool table, then clustering; both depend only on the job set.
    state.tools = ToolTable::build(jobs.values());
    let remap = state.tools.cluster(config.panel.drillclustertolerance);
    if !remap.is_empty() {
        println!("Clustered {} drill diameters ...", remap.len());
        for job in jobs.values_mut() {
            ToolTable::apply_remap(job, &remap);
        }
    }

    let registry = JobRegistry::build(jobs, &mut state.apertures, &mut state.macros)?;
    let origin = (
        PANEL_ORIGIN.0 + config.panel.leftmargin,
        PANEL_ORIGIN.1 + config.panel.bottommargin,
    );

    println!("Performing layout ...");
    let placement = if let Some(place_file) = &args.place_file {
        Placement::from_file(place_file, &registry)?
    } else if let Some(layout_file) = &args.layout {
        let rows = parse_layout(layout_file)?;
        Placement::from_layout(
            &rows,
            &registry,
            origin.0,
            origin.1,
            config.panel.xspacing,
            config.panel.yspacing,
        )?
    } else {
        auto_place(args, &config, &registry, origin)?
    };
    if placement.is_empty() {
        bail!("nothing to place");
    }

    println!("Writing merged output files ...");
    let report = merge(
        &config,
        &mut state,
        &placement,
        args.octagons.into(),
        Path::new("."),
    )?;
    print_report(&report);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = configure_logging();
    install_panic_hook();
    info!(target: "runtime", config = %args.config.display(), "startup");
    run(&args).context("panelization failed")
}
