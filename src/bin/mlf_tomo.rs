use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use mlf_tomo::grid::AngularRange;
use mlf_tomo::metadata::{self, FractionEntry, Misalignment, ParticleEntry, ParticleRecord};
use mlf_tomo::symmetry::PointGroup;
use mlf_tomo::{io, logging, MissingWedge, Particle, RefineConfig, Refiner};

/// Maximum-likelihood alignment and classification of sub-tomograms.
///
/// The particle document is a JSON array of entries
///   {"volume": "p001.npy", "rot": 0, "tilt": 0, "psi": 0,
///    "xoff": 0, "yoff": 0, "zoff": 0, "wedge": 1}
/// with volume paths relative to the document. The wedge table is a JSON
/// array of {"id": 1, "theta0": -60, "theta_f": 60}.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Particle document (JSON)
    #[arg(long)]
    particles: PathBuf,

    /// Reference volume (.npy), one per class
    #[arg(long = "reference", required = true)]
    references: Vec<PathBuf>,

    /// Missing wedge table (JSON); all particles fully sampled without one
    #[arg(long)]
    wedges: Option<PathBuf>,

    /// Initial class fractions (JSON array of {"class", "fraction"})
    #[arg(long)]
    fractions: Option<PathBuf>,

    /// Initial noise table ("shell value" lines); skips noise estimation
    #[arg(long)]
    sigma2: Option<PathBuf>,

    /// Planned misalignment table (JSON), added to the particle alignment
    #[arg(long)]
    misalign: Option<PathBuf>,

    /// Solvent mask (.npy); may be repeated
    #[arg(long = "solvent")]
    solvent: Vec<PathBuf>,

    /// Point group symmetry of the references, e.g. C1, C4, D2
    #[arg(long)]
    symmetry: Option<String>,

    /// Base configuration (JSON); the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    iterations: Option<usize>,

    /// Number of the first iteration
    #[arg(long)]
    istart: Option<usize>,

    #[arg(
        long,
        num_args = 3,
        value_names = ["START", "END", "STEP"],
        allow_negative_numbers = true,
    )]
    rot: Option<Vec<f64>>,

    #[arg(
        long,
        num_args = 3,
        value_names = ["START", "END", "STEP"],
        allow_negative_numbers = true,
    )]
    tilt: Option<Vec<f64>>,

    #[arg(
        long,
        num_args = 3,
        value_names = ["START", "END", "STEP"],
        allow_negative_numbers = true,
    )]
    psi: Option<Vec<f64>>,

    /// Translation search radius in pixels
    #[arg(long)]
    search_radius: Option<f64>,

    /// Initial width of the offset prior
    #[arg(long)]
    sigma_offset: Option<f64>,

    /// Lowest resolution used, as a fraction of the box
    #[arg(long, allow_negative_numbers = true)]
    lowres: Option<f64>,

    /// Highest resolution used, as a fraction of the box (at most 0.5)
    #[arg(long, allow_negative_numbers = true)]
    highres: Option<f64>,

    #[arg(long)]
    fix_fractions: bool,

    #[arg(long)]
    fix_sigma_noise: bool,

    #[arg(long)]
    fix_sigma_offset: bool,

    /// Sweep particles on one thread, in order
    #[arg(long)]
    sequential: bool,

    /// Output directory
    #[arg(long)]
    out: PathBuf,

    /// Prefix of every output file
    #[arg(long, default_value = "mlf")]
    prefix: String,

    /// Log filter
    #[arg(long, default_value = "info")]
    log: String,
}

impl Args {
    fn config(&self) -> Result<RefineConfig> {
        let mut config = match &self.config {
            Some(path) => io::read_json(path)?,
            None => RefineConfig::default(),
        };
        if let Some(n) = self.iterations {
            config.iterations = n;
        }
        if let Some(n) = self.istart {
            config.istart = n;
        }
        for (range, flag) in [
            (&mut config.rot, &self.rot),
            (&mut config.tilt, &self.tilt),
            (&mut config.psi, &self.psi),
        ] {
            if let Some(v) = flag {
                *range = AngularRange::new(v[0], v[1], v[2]);
            }
        }
        if let Some(v) = self.search_radius {
            config.search_radius = v;
        }
        if let Some(v) = self.sigma_offset {
            config.sigma_offset = v;
        }
        if let Some(v) = self.lowres {
            config.lowres = v;
        }
        if let Some(v) = self.highres {
            config.highres = v;
        }
        config.frozen.fractions |= self.fix_fractions;
        config.frozen.sigma_noise |= self.fix_sigma_noise;
        config.frozen.sigma_offset |= self.fix_sigma_offset;
        if self.sequential {
            config.parallel = false;
        }
        Ok(config)
    }

    fn output(&self, name: impl AsRef<str>) -> PathBuf {
        self.out.join(format!("{}_{}", self.prefix, name.as_ref()))
    }
}

fn load_particles(path: &Path) -> Result<Vec<Particle>> {
    let entries: Vec<ParticleEntry> = io::read_json(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    entries
        .into_iter()
        .map(|e| {
            let volume = io::read_volume(base.join(&e.volume))?;
            Ok(Particle::new(e.volume.clone(), volume)
                .with_wedge(e.wedge)
                .with_alignment(e.angles(), e.offset()))
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log)?;

    let config = args.config()?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create output directory {:?}", args.out))?;

    let references = args
        .references
        .iter()
        .map(io::read_volume)
        .collect::<Result<Vec<_>>>()?;
    let wedges: Vec<MissingWedge> = match &args.wedges {
        Some(path) => io::read_json(path)?,
        None => Vec::new(),
    };
    let mut particles = load_particles(&args.particles)?;
    if let Some(path) = &args.misalign {
        let table: Vec<Misalignment> = io::read_json(path)?;
        metadata::apply_misalignment(&mut particles, &table)?;
    }

    let mut refiner = Refiner::new(config.clone(), &references, &wedges)?;
    if let Some(path) = &args.fractions {
        let table: Vec<FractionEntry> = io::read_json(path)?;
        let fractions = metadata::fractions_from_table(&table, references.len())?;
        refiner = refiner.with_fractions(fractions)?;
    }
    if let Some(path) = &args.sigma2 {
        let sigma2 = io::read_sigma2(path, refiner.band())?;
        refiner = refiner.with_sigma2(sigma2)?;
    }
    if let Some(descriptor) = &args.symmetry {
        refiner = refiner.with_symmetry(descriptor.parse::<PointGroup>()?);
    }
    if !args.solvent.is_empty() {
        let masks = args
            .solvent
            .iter()
            .map(io::read_volume)
            .collect::<Result<Vec<_>>>()?;
        refiner = refiner.with_solvent_masks(masks)?;
    }

    io::write_json(args.output("config.json"), &config)?;

    let fresh_noise = args.sigma2.is_none();
    let sigma2 = refiner.prepare(&particles)?.to_vec();
    if fresh_noise {
        let it = config.istart.saturating_sub(1);
        io::write_sigma2(args.output(format!("it{:05}_sigma2.dat", it)), &sigma2)?;
    }

    for _ in 0..config.iterations {
        let summary = refiner.iterate(&mut particles)?;
        let it = format!("it{:05}", summary.iteration);

        for (k, (raw, post)) in summary
            .raw_references
            .iter()
            .zip(&summary.references)
            .enumerate()
        {
            io::write_volume(args.output(format!("{}_class{:03}_raw.npy", it, k + 1)), raw)?;
            io::write_volume(args.output(format!("{}_class{:03}.npy", it, k + 1)), post)?;
        }
        let records: Vec<ParticleRecord> = particles.iter().map(ParticleRecord::from).collect();
        io::write_json(args.output(format!("{}_particles.json", it)), &records)?;
        io::write_json(
            args.output(format!("{}_fractions.json", it)),
            &metadata::fractions_to_table(&summary.log.fractions),
        )?;
        io::write_sigma2(args.output(format!("{}_sigma2.dat", it)), &summary.log.sigma2)?;
        io::write_json(args.output(format!("{}_log.json", it)), &summary.log)?;

        println!(
            "iteration {}: log-likelihood {:.6e}, average fit {:.5}, sigma_offset {:.4}",
            summary.iteration,
            summary.log.log_likelihood,
            summary.log.average_fit,
            summary.log.sigma_offset
        );
    }

    println!("Results written to {:?}", args.out);

    Ok(())
}
