//! Command-line front end: compress or decompress raw sample volumes.

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use embra::{CancelToken, EngineKind, RateTarget, calc_stats, compress, decompress};
use log::info;

#[derive(Parser)]
#[command(name = "embra", about = "Progressive wavelet compression for raw volumes")]
struct Opts {
    /// Input file: raw samples when compressing, a bitstream with `-d`.
    input: PathBuf,

    /// Volume extents as X,Y,Z (use Z = 1 for images).
    #[arg(long, value_delimiter = ',', num_args = 3)]
    dims: Vec<usize>,

    /// Decompress instead of compressing.
    #[arg(short = 'd', long)]
    decompress: bool,

    /// Write the compressed bitstream here.
    #[arg(short = 'z', long)]
    output: Option<PathBuf>,

    /// Write the reconstruction here (raw samples, same format as input).
    #[arg(short = 'r', long)]
    reconstruct: Option<PathBuf>,

    /// Point-wise error tolerance.
    #[arg(long, conflicts_with_all = ["psnr", "bpp"])]
    pwe: Option<f64>,

    /// Target PSNR in dB.
    #[arg(long, conflicts_with = "bpp")]
    psnr: Option<f64>,

    /// Target rate in bits per sample.
    #[arg(long)]
    bpp: Option<f64>,

    /// Samples are 32-bit floats instead of 64-bit.
    #[arg(long)]
    f32: bool,

    /// Use the filtered-probability engine instead of set partitioning.
    #[arg(long)]
    tarp: bool,
}

fn read_samples(path: &PathBuf, total: usize, single: bool) -> Result<Vec<f64>, Box<dyn Error>> {
    let bytes = fs::read(path)?;
    let expected = total * if single { 4 } else { 8 };
    if bytes.len() != expected {
        return Err(format!(
            "{} holds {} bytes, expected {expected} for the given dims",
            path.display(),
            bytes.len()
        )
        .into());
    }

    // `pod_collect_to_vec` copies, so the byte buffer's alignment does not
    // matter.
    let samples = if single {
        bytemuck::allocation::pod_collect_to_vec::<u8, f32>(&bytes)
            .into_iter()
            .map(|v| v as f64)
            .collect()
    } else {
        bytemuck::allocation::pod_collect_to_vec::<u8, f64>(&bytes)
    };

    Ok(samples)
}

fn write_samples(path: &PathBuf, samples: &[f64], single: bool) -> Result<(), Box<dyn Error>> {
    if single {
        let narrow: Vec<f32> = samples.iter().map(|&v| v as f32).collect();
        fs::write(path, bytemuck::cast_slice(&narrow))?;
    } else {
        fs::write(path, bytemuck::cast_slice(samples))?;
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts = Opts::parse();

    let [nx, ny, nz]: [usize; 3] = opts
        .dims
        .clone()
        .try_into()
        .map_err(|_| "expected --dims X,Y,Z")?;
    let dims = (nx, ny, nz);
    let total = nx * ny * nz;

    let engine = if opts.tarp {
        EngineKind::tarp()
    } else {
        EngineKind::Speck
    };
    let cancel = CancelToken::new();

    if opts.decompress {
        let stream = fs::read(&opts.input)?;
        let recon = decompress(&stream, dims, engine, None, &cancel)?;

        let out = opts
            .reconstruct
            .as_ref()
            .ok_or("decompression needs -r for the output")?;
        write_samples(out, &recon, opts.f32)?;
        info!("wrote {} samples to {}", recon.len(), out.display());
        return Ok(());
    }

    let target = if let Some(tolerance) = opts.pwe {
        RateTarget::FixedPwe { tolerance }
    } else if let Some(db) = opts.psnr {
        RateTarget::FixedPsnr { db }
    } else if let Some(bpp) = opts.bpp {
        RateTarget::FixedSize {
            budget_bytes: ((bpp * total as f64) / 8.0).ceil() as u64,
        }
    } else {
        return Err("pick a target: --pwe, --psnr or --bpp".into());
    };

    let data = read_samples(&opts.input, total, opts.f32)?;
    let stream = compress(data.clone(), dims, target, engine, None, &cancel)?;

    let ratio = (total * if opts.f32 { 4 } else { 8 }) as f64 / stream.len() as f64;
    info!("{} bytes ({ratio:.2}:1)", stream.len());

    if let Some(out) = &opts.output {
        fs::write(out, &stream)?;
    }

    if let Some(out) = &opts.reconstruct {
        let recon = decompress(&stream, dims, engine, None, &cancel)?;
        let stats = calc_stats(&data, &recon);
        info!(
            "round trip: rmse {:.3e}, max error {:.3e}, psnr {:.2} dB",
            stats.rmse, stats.linf, stats.psnr
        );
        write_samples(out, &recon, opts.f32)?;
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
