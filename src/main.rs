//! Command-line driver: runs one activation operator on values given on the
//! command line and reports the execution path the engine picked.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use log::error;
use serde_json::json;

use eltwise_engine::device::DeviceInfo;
use eltwise_engine::ops::EltwiseOp;
use eltwise_engine::{DType, Engine, EngineConfig, ExecutionPlan, GeluApproximation, Result, Tensor};

#[derive(Parser)]
#[command(name = "eltwise_engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run activation operators on the fused or generic path")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one operator and print the result
    Run(RunArgs),

    /// Print detected device information
    Device {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Op {
    Relu,
    LeakyRelu,
    Threshold,
    Gelu,
    Silu,
    Mish,
    Hardshrink,
    Hardswish,
    Rrelu,
    Prelu,
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, value_enum)]
    op: Op,

    /// Input values, comma separated
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    values: Vec<f64>,

    /// Input shape; a vector of all values when omitted
    #[arg(long, value_delimiter = ',')]
    shape: Option<Vec<usize>>,

    #[arg(long, default_value = "f32")]
    dtype: DType,

    /// Reorder the input to the opaque format before running
    #[arg(long)]
    opaque: bool,

    #[arg(long, default_value_t = 0.5)]
    lambd: f64,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    threshold: f64,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    value: f64,

    #[arg(long, default_value_t = 0.01)]
    negative_slope: f64,

    #[arg(long, default_value = "none")]
    approximate: GeluApproximation,

    #[arg(long, default_value_t = 1.0 / 8.0)]
    lower: f64,

    #[arg(long, default_value_t = 1.0 / 3.0)]
    upper: f64,

    /// Draw random slopes for rrelu instead of using the midpoint
    #[arg(long)]
    training: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Prelu weights, comma separated
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "0.25")]
    weight: Vec<f64>,

    /// JSON engine config; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    prefer_fused: bool,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn eltwise_op(&self) -> Option<EltwiseOp> {
        Some(match self.op {
            Op::Relu => EltwiseOp::Relu,
            Op::LeakyRelu => EltwiseOp::LeakyRelu {
                negative_slope: self.negative_slope,
            },
            Op::Threshold => EltwiseOp::Threshold {
                threshold: self.threshold,
                value: self.value,
            },
            Op::Gelu => EltwiseOp::Gelu(self.approximate),
            Op::Silu => EltwiseOp::Silu,
            Op::Mish => EltwiseOp::Mish,
            Op::Hardshrink => EltwiseOp::Hardshrink { lambd: self.lambd },
            Op::Hardswish => EltwiseOp::Hardswish,
            Op::Rrelu | Op::Prelu => return None,
        })
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if self.prefer_fused {
            config.prefer_fused_for_plain = true;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok(config)
    }
}

fn describe(plan: Option<&ExecutionPlan>) -> String {
    match plan {
        Some(ExecutionPlan::Fused(p)) => format!("fused {} ({:?})", p.algorithm, p.propagation),
        Some(ExecutionPlan::Generic(l)) => format!(
            "generic kernel, {} groups of {}",
            l.group_count(),
            l.group_size()
        ),
        None => "dedicated kernel".to_string(),
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let engine = Engine::new(args.engine_config()?)?;
    let shape = args.shape.clone().unwrap_or_else(|| vec![args.values.len()]);
    let mut x = Tensor::from_f64_slice(&args.values, &shape, args.dtype)?;
    if args.opaque {
        x = engine.to_opaque(&x)?;
    }

    let mut noise = None;
    let (plan, result) = match args.eltwise_op() {
        Some(op) => {
            let inputs: Vec<&Tensor> = vec![&x; op.arity()];
            let plan = engine.plan(&op, &inputs, None)?;
            (Some(plan), engine.eltwise(&op, &inputs, None)?)
        }
        None if matches!(args.op, Op::Prelu) => {
            let weight = Tensor::from_f64_slice(&args.weight, &[args.weight.len()], args.dtype)?;
            (None, engine.prelu(&x, &weight)?)
        }
        None => {
            let recorded = Tensor::zeros(x.shape(), x.dtype());
            let generator = engine.generator();
            let y = engine.rrelu_with_noise(&x, &recorded, args.lower, args.upper, args.training, &generator)?;
            noise = Some(recorded.to_f64_vec()?);
            (None, y)
        }
    };
    let values = engine.to_plain(&result)?.to_f64_vec()?;

    if args.json {
        let report = json!({
            "op": format!("{:?}", args.op),
            "dtype": args.dtype.as_str(),
            "shape": shape,
            "plan": plan,
            "opaque_result": result.is_opaque(),
            "values": values,
            "noise": noise,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{:?} on {:?} {}: {}", args.op, shape, args.dtype, describe(plan.as_ref()));
        println!("{values:?}");
        if let Some(noise) = noise {
            println!("noise {noise:?}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let outcome: Result<()> = match &cli.command {
        Commands::Run(args) => run(args),
        Commands::Device { json } => {
            let info = DeviceInfo::detect();
            if *json {
                serde_json::to_string_pretty(&info)
                    .map(|s| println!("{s}"))
                    .map_err(Into::into)
            } else {
                println!("{}", info.describe());
                Ok(())
            }
        }
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
