use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use image::{open, GenericImageView};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lkmatch::config::MatcherConfig;
use lkmatch::gray_image::GrayImage;
use lkmatch::matcher::{IterationStatus, LucasKanadeMatcher, MatchOutcome};
use lkmatch::warp::{render_warped, AffineWarp, ProjectiveWarp, Translation, WarpModel};

/// Command line arguments structure.
#[derive(Parser, Debug)]
#[command(author, version, about = "CLI for sub-pixel patch alignment with the Lucas-Kanade matcher.")]
struct Args {
    /// Search image filename
    #[arg()]
    search: String,

    /// Reference patch filename
    #[arg(long, conflicts_with = "region")]
    reference: Option<String>,

    /// Cut the reference patch out of the search image, given as x,y,width,height
    #[arg(long, value_parser = parse_region)]
    region: Option<Region>,

    /// Warp model to estimate
    #[arg(long, value_enum, default_value_t = Model::Translation)]
    model: Model,

    /// Assumed position x,y of the reference centre in the search image.
    /// Defaults to the region centre, or the search image centre.
    #[arg(long, value_parser = parse_point)]
    initial: Option<Point>,

    /// Perturbation dx,dy added to the initial position
    #[arg(long, value_parser = parse_point, default_value = "0,0", allow_hyphen_values = true)]
    offset: Point,

    /// Convergence threshold on the squared norm of the parameter update
    #[arg(long, default_value_t = 1e-5)]
    tolerance: f64,

    /// Refinement passes allowed per attempt
    #[arg(long, default_value_t = 100)]
    max_iterations: usize,

    /// Additional attempts from randomly perturbed starts if a run fails
    #[arg(long, default_value_t = 0)]
    restarts: usize,

    /// Largest perturbation in pixels used for restarts
    #[arg(long, default_value_t = 1.0)]
    jitter: f64,

    /// Seed for the restart perturbations
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write the search image resampled through the final warp to this file
    #[arg(long)]
    output_warped: Option<String>,

    /// Log level filter, e.g. "info" or "lkmatch=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    Translation,
    Affine,
    Projective,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

fn parse_point(s: &str) -> Result<Point, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in '{s}': {e}"))?;
    match values.as_slice() {
        &[x, y] => Ok(Point { x, y }),
        _ => Err(format!("expected x,y but got '{s}'")),
    }
}

fn parse_region(s: &str) -> Result<Region, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in '{s}': {e}"))?;
    match values.as_slice() {
        &[x, y, width, height] => Ok(Region {
            x,
            y,
            width,
            height,
        }),
        _ => Err(format!("expected x,y,width,height but got '{s}'")),
    }
}

fn setup_logging(level: &str) -> Result<LoggerHandle> {
    let handle = Logger::try_with_str(level)
        .with_context(|| format!("invalid log level '{level}'"))?
        .start()
        .context("logger initialization failed")?;
    Ok(handle)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _logger = setup_logging(&args.log_level)?;

    if !(args.jitter.is_finite() && args.jitter >= 0.0) {
        bail!("--jitter must be a non-negative number");
    }

    let search = read_gray(&args.search)?;
    let (reference, default_center) = match (&args.reference, args.region) {
        (Some(path), _) => {
            let center = (
                (search.width() as f64 - 1.0) / 2.0,
                (search.height() as f64 - 1.0) / 2.0,
            );
            (read_gray(path)?, center)
        }
        (None, Some(r)) => {
            let patch = search.crop(r.x, r.y, r.width, r.height)?;
            let t = Translation::over_region(r.x, r.y, r.width, r.height);
            (patch, (t.tx, t.ty))
        }
        (None, None) => bail!("either --reference or --region is required"),
    };

    let initial = args.initial.map(|p| (p.x, p.y)).unwrap_or(default_center);
    let start = (initial.0 + args.offset.x, initial.1 + args.offset.y);
    info!(
        "reference {}x{}, start at ({:.3}, {:.3}), {:?} model",
        reference.width(),
        reference.height(),
        start.0,
        start.1,
        args.model
    );

    let config = MatcherConfig::default()
        .with_tolerance(args.tolerance)
        .with_max_iterations(args.max_iterations);
    let mut matcher = LucasKanadeMatcher::new(search, reference, config)?;

    let converged = match args.model {
        Model::Translation => execute(&mut matcher, &args, start, Translation::new)?,
        Model::Affine => execute(&mut matcher, &args, start, AffineWarp::from_translation)?,
        Model::Projective => {
            execute(&mut matcher, &args, start, ProjectiveWarp::from_translation)?
        }
    };

    if !converged {
        std::process::exit(1);
    }
    Ok(())
}

/// Aligns, reports and optionally writes the warped patch for one warp model.
/// Returns whether the match converged.
fn execute<W, F>(
    matcher: &mut LucasKanadeMatcher,
    args: &Args,
    start: (f64, f64),
    make_warp: F,
) -> Result<bool>
where
    W: WarpModel,
    F: Fn(f64, f64) -> W,
{
    let mut rng = StdRng::seed_from_u64(args.seed);
    let (warp, outcome) = align_with_restarts(
        matcher,
        start,
        args.restarts,
        args.jitter,
        &mut rng,
        make_warp,
    )?;

    let (cx, cy) = warp.apply((0.0, 0.0));
    println!("Status: {:?}", outcome.status);
    println!("Iterations: {}", outcome.iterations);
    if let Some(rms) = outcome.rms_error {
        println!("RMS error: {rms:.6}");
    }
    println!("Reference centre in search image: ({cx:.4}, {cy:.4})");
    let params: Vec<String> = warp.parameters().iter().map(|p| format!("{p:.6}")).collect();
    println!("Parameters: [{}]", params.join(", "));

    if let Some(path) = &args.output_warped {
        let reference = matcher.reference();
        let warped = render_warped(
            matcher.search(),
            &warp,
            reference.width(),
            reference.height(),
            matcher.config().border_mode,
        );
        save_gray(&warped, path)?;
    }

    Ok(outcome.status == IterationStatus::Converged)
}

/// Runs the matcher from `start`; on failure retries up to `restarts` times
/// from positions jittered by at most `jitter` pixels. Returns the first
/// converged result, or the last attempt if none converges.
fn align_with_restarts<W, F, R>(
    matcher: &mut LucasKanadeMatcher,
    start: (f64, f64),
    restarts: usize,
    jitter: f64,
    rng: &mut R,
    make_warp: F,
) -> Result<(W, MatchOutcome)>
where
    W: WarpModel,
    F: Fn(f64, f64) -> W,
    R: Rng,
{
    let mut attempt = 0;
    loop {
        let (x, y) = if attempt == 0 {
            start
        } else {
            (
                start.0 + rng.random_range(-jitter..=jitter),
                start.1 + rng.random_range(-jitter..=jitter),
            )
        };
        matcher.reset();
        let mut warp = make_warp(x, y);
        let outcome = run_with_progress(matcher, &mut warp)?;

        if outcome.status == IterationStatus::Converged || attempt == restarts {
            return Ok((warp, outcome));
        }
        attempt += 1;
        warn!(
            "attempt ended with {:?}, restarting ({}/{})",
            outcome.status, attempt, restarts
        );
    }
}

fn run_with_progress<W: WarpModel>(
    matcher: &mut LucasKanadeMatcher,
    warp: &mut W,
) -> Result<MatchOutcome> {
    loop {
        let status = matcher.iterate_once(warp)?;
        if matches!(status, IterationStatus::Continuing | IterationStatus::Converged) {
            info!(
                "pass {}: rms {:.6}, update {:.3e}",
                matcher.iteration(),
                matcher.rms_error().unwrap_or(f64::NAN),
                matcher.last_update_magnitude().unwrap_or(f64::NAN)
            );
        }
        if status != IterationStatus::Continuing {
            return Ok(MatchOutcome {
                status,
                iterations: matcher.iteration(),
                rms_error: matcher.rms_error(),
            });
        }
    }
}

pub fn read_gray(filename: &str) -> Result<GrayImage> {
    info!("Reading image file: {filename}");
    let img = open(filename).with_context(|| format!("could not load image {filename}"))?;
    let (width, height) = img.dimensions();
    let rgba = img.to_rgba8().into_raw();
    Ok(GrayImage::from_rgba(width as usize, height as usize, &rgba)?)
}

pub fn save_gray(image: &GrayImage, filename: &str) -> Result<()> {
    info!("Writing image {filename}");
    let img = image::RgbaImage::from_raw(
        image.width() as u32,
        image.height() as u32,
        image.to_rgba8(),
    )
    .context("pixel buffer does not match the image size")?;
    img.save(filename).with_context(|| format!("could not write {filename}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_and_regions() {
        assert_eq!(parse_point("1.5, -2").unwrap(), Point { x: 1.5, y: -2.0 });
        assert!(parse_point("1,2,3").is_err());
        assert!(parse_point("a,b").is_err());
        assert_eq!(
            parse_region("4,5,16,12").unwrap(),
            Region {
                x: 4,
                y: 5,
                width: 16,
                height: 12
            }
        );
        assert!(parse_region("4,5,-1,12").is_err());
    }

    #[test]
    fn restarts_stop_at_the_first_convergence() {
        let search = GrayImage::from_fn(40, 40, |x, y| {
            let (x, y) = (x as f32, y as f32);
            100.0 + 40.0 * (0.3 * x).sin() + 30.0 * (0.25 * y + 0.1 * x).cos()
        });
        let reference = search.crop(12, 10, 15, 15).unwrap();
        let mut matcher =
            LucasKanadeMatcher::new(search, reference, MatcherConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let (warp, outcome) =
            align_with_restarts(&mut matcher, (19.4, 17.3), 2, 0.5, &mut rng, Translation::new)
                .unwrap();

        assert_eq!(outcome.status, IterationStatus::Converged);
        assert!((warp.tx - 19.0).abs() < 0.01);
        assert!((warp.ty - 17.0).abs() < 0.01);
    }
}
