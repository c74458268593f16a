use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ndarray::Zip;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mlf_tomo::fourier::Fft3;
use mlf_tomo::grid::{AngularRange, HypothesisGrid, SearchSpace};
use mlf_tomo::metadata::ParticleEntry;
use mlf_tomo::volume::{self, centered, Volume};
use mlf_tomo::{io, logging, MissingWedge};

/// Generate noisy, wedge-filtered particles from known references.
///
/// Each particle is a reference rotated to a random orientation of the
/// search grid, translated by a random integer offset, corrupted with
/// Gaussian noise and stripped of its missing wedge. Writes the volumes,
/// `particles.json` (no alignment), `wedges.json` and `truth.json` holding
/// the applied rotations, shifts and classes.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Reference volume (.npy), one per class
    #[arg(long = "reference", required = true)]
    references: Vec<PathBuf>,

    /// Particles per class
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Standard deviation of the real-space noise
    #[arg(long, default_value_t = 0.1)]
    noise: f64,

    /// Largest absolute shift per axis, in pixels
    #[arg(long, default_value_t = 0)]
    max_offset: i64,

    /// Rot sampling of the orientations drawn from
    #[arg(
        long,
        num_args = 3,
        value_names = ["START", "END", "STEP"],
        default_values_t = [0.0, 360.0, 90.0],
        allow_negative_numbers = true,
    )]
    rot: Vec<f64>,

    #[arg(
        long,
        num_args = 3,
        value_names = ["START", "END", "STEP"],
        default_values_t = [0.0, 90.0, 90.0],
        allow_negative_numbers = true,
    )]
    tilt: Vec<f64>,

    #[arg(
        long,
        num_args = 3,
        value_names = ["START", "END", "STEP"],
        default_values_t = [0.0, 270.0, 90.0],
        allow_negative_numbers = true,
    )]
    psi: Vec<f64>,

    /// Sampled tilt span of the single wedge
    #[arg(
        long,
        num_args = 2,
        value_names = ["THETA0", "THETA_F"],
        default_values_t = [-60.0, 60.0],
        allow_negative_numbers = true,
    )]
    wedge: Vec<f64>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Output directory
    #[arg(long)]
    out: PathBuf,
}

/// Ground truth of one simulated particle.
#[derive(Debug, serde::Serialize)]
struct Truth {
    volume: String,
    /// One-based class number.
    class: usize,
    rot: f64,
    tilt: f64,
    psi: f64,
    /// Shift applied after rotation, `[x, y, z]`.
    shift: [i64; 3],
}

/// Zero every coefficient outside the wedge.
fn apply_wedge(vol: &Volume, wedge: &MissingWedge, fft: &Fft3) -> Volume {
    let dim = fft.dim();
    let mut spectrum = fft.forward(vol);
    Zip::indexed(&mut spectrum.re)
        .and(&mut spectrum.im)
        .for_each(|(z, y, x), re, im| {
            let k = [centered(x, dim), centered(y, dim), centered(z, dim)];
            if !wedge.observes(k) {
                *re = 0.0;
                *im = 0.0;
            }
        });
    fft.inverse(&spectrum)
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("info")?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create output directory {:?}", args.out))?;

    let references = args
        .references
        .iter()
        .map(io::read_volume)
        .collect::<Result<Vec<_>>>()?;
    let dim = volume::cube_dim(&references[0])?;
    for (i, r) in references.iter().enumerate() {
        volume::check_dim(format!("reference {}", i + 1), r, dim)?;
    }

    let space = SearchSpace {
        rot: AngularRange::new(args.rot[0], args.rot[1], args.rot[2]),
        tilt: AngularRange::new(args.tilt[0], args.tilt[1], args.tilt[2]),
        psi: AngularRange::new(args.psi[0], args.psi[1], args.psi[2]),
        search_radius: 0.0,
    };
    let grid = HypothesisGrid::new(&space, 0.0)?;
    let wedge = MissingWedge {
        id: 1,
        theta0: args.wedge[0],
        theta_f: args.wedge[1],
    };
    if wedge.theta0 >= wedge.theta_f {
        return Err(anyhow!("wedge span [{}, {}) is empty", wedge.theta0, wedge.theta_f));
    }
    let noise = Normal::new(0.0, args.noise)
        .map_err(|e| anyhow!("Invalid noise level {}: {}", args.noise, e))?;
    let fft = Fft3::new(dim);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut entries = Vec::new();
    let mut truth = Vec::new();
    for (class, reference) in references.iter().enumerate() {
        for _ in 0..args.count {
            let orientation = &grid.orientations[rng.gen_range(0..grid.orientations.len())];
            let shift = [(); 3].map(|_| rng.gen_range(-args.max_offset..=args.max_offset));

            let rotated = volume::rotate(reference, &orientation.matrix);
            let moved = volume::translate_wrapped(&rotated, shift);
            let noisy = moved + Volume::random_using((dim, dim, dim), noise, &mut rng);
            let particle = apply_wedge(&noisy, &wedge, &fft);

            let name = format!("particle_{:05}.npy", entries.len() + 1);
            io::write_volume(args.out.join(&name), &particle)?;
            truth.push(Truth {
                volume: name.clone(),
                class: class + 1,
                rot: orientation.rot,
                tilt: orientation.tilt,
                psi: orientation.psi,
                shift,
            });
            entries.push(ParticleEntry {
                volume: name,
                rot: 0.0,
                tilt: 0.0,
                psi: 0.0,
                xoff: 0.0,
                yoff: 0.0,
                zoff: 0.0,
                wedge: wedge.id,
            });
        }
    }

    io::write_json(args.out.join("particles.json"), &entries)?;
    io::write_json(args.out.join("wedges.json"), &[wedge])?;
    io::write_json(args.out.join("truth.json"), &truth)?;

    tracing::info!(particles = entries.len(), dim, "simulated particles written");
    println!("{} particles written to {:?}", entries.len(), args.out);

    Ok(())
}
