//! FSA gradient-check harness
//!
//! Builds the horizontal / vertical operators for a mixer config, prints the
//! kernel map, then runs forward + backward on seeded random tensors and
//! compares the analytic gradients with central differences.
//!
//! Usage:
//!   fsa_gradcheck [--config mixer.json] [--height 12 --width 12] \
//!       [--direction both] [--print-map] [--json]
//!
//! Logging is controlled by RUST_LOG (e.g. RUST_LOG=fsa_attn=debug).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use fsa_attn::activation::bounded_kernel;
use fsa_attn::gradcheck::{self, GradCheckOptions, GradCheckReport};
use fsa_attn::{KernelMapCache, MixerConfig, Result, Shape4, Tensor4};

#[derive(Parser, Debug)]
#[command(name = "fsa_gradcheck", about = "Check FSA local-attention gradients against finite differences")]
struct Args {
    /// Mixer config JSON (defaults: dim 64, kernel 13, loc [4,6,7], stride [1,2,4], 4 heads)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    batch: usize,

    #[arg(long, default_value_t = 12)]
    height: usize,

    #[arg(long, default_value_t = 12)]
    width: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Central-difference step
    #[arg(long, default_value_t = 1e-2)]
    eps: f32,

    #[arg(long, default_value_t = 1e-3)]
    tolerance: f64,

    /// Probed elements per tensor
    #[arg(long, default_value_t = 256)]
    samples: usize,

    /// horizontal | vertical | both
    #[arg(long, default_value = "both")]
    direction: String,

    /// Print the kernel map before checking
    #[arg(long)]
    print_map: bool,

    /// Emit the reports as JSON
    #[arg(long)]
    json: bool,
}

fn run(args: &Args) -> Result<Vec<GradCheckReport>> {
    let config = match &args.config {
        Some(path) => MixerConfig::from_file(path)?,
        None => MixerConfig::default(),
    };
    let directions = gradcheck::parse_directions(&args.direction)?;

    let mut cache = KernelMapCache::new();
    let ops = config.build(&mut cache)?;

    log::info!(
        "Mixer: dim={}, kernel_size={}, groups={}, group_channels={}, patch_size={}",
        config.dim,
        config.kernel_size,
        config.groups(),
        config.group_channels(),
        ops.patch_size
    );

    if args.print_map {
        let map = ops.kernel_map();
        if args.json {
            println!("{}", serde_json::to_string(&**map)?);
        } else {
            println!("kernel map {} (patch_size={})", map.content_id(), map.patch_size());
            println!("  offsets: {:?}", map.offsets());
            println!("  strides: {:?}", map.tap_strides());
        }
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(args.seed);
    let shape = Shape4::new(args.batch, ops.horizontal.channels(), args.height, args.width);
    let input = Tensor4::random(shape, &mut rng);
    // Kernel weights reach the operator through tanh, as in the model
    let kernel = bounded_kernel(&Tensor4::random(ops.horizontal.kernel_shape(shape), &mut rng));
    let grad_output = Tensor4::random(shape, &mut rng);

    let options = GradCheckOptions {
        eps: args.eps,
        tolerance: args.tolerance,
        max_samples: args.samples,
    };

    let selected: Vec<_> = directions.iter().map(|&d| ops.get(d)).collect();
    gradcheck::check_all(&selected, &input, &kernel, &grad_output, &options)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let reports = match run(&args) {
        Ok(reports) => reports,
        Err(e) => {
            log::warn!("Rejected configuration: {}", e);
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        for report in &reports {
            println!(
                "{:<10} input: {:>4} probes, max err {:.3e} | kernel: {:>4} probes, max err {:.3e} | {}",
                report.direction,
                report.input_samples,
                report.max_input_error,
                report.kernel_samples,
                report.max_kernel_error,
                if report.passed { "PASS" } else { "FAIL" }
            );
        }
    }

    if reports.iter().all(|r| r.passed) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
