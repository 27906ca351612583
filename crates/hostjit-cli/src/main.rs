//! hostjit CLI
//!
//! Small driver that builds, compiles and runs functions on the engine.
//! Useful for checking a platform and for reading the generated code.

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use hostjit_engine::{Context, ContextConfig, Function, HostStr, OptLevel, RunValue, Type, UnclassifiedPolicy};

#[derive(Parser)]
#[command(name = "hostjit")]
#[command(about = "Build and run JIT functions that call back into the host", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Optimization level: none, speed, speed_and_size
    #[arg(long, default_value = "speed", global = true)]
    opt_level: String,

    /// Map unclassified host types to void instead of failing
    #[arg(long, global = true)]
    degrade: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile `x * y + z` and run it
    MulAdd {
        x: i64,
        y: i64,
        z: i64,
    },

    /// Compile a function that hands a value to a host callback
    Callback {
        /// Value passed through the callback
        #[arg(default_value_t = 21)]
        value: i64,

        /// Number of times the compiled code calls the host
        #[arg(short, long, default_value_t = 1)]
        repeat: u32,
    },

    /// Print the recorded IR and the Cranelift IR of a bridged function
    Dump,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = context_config(&cli)?;
    let ctx = Context::with_config(config).context("creating JIT context")?;

    match cli.command {
        Commands::MulAdd { x, y, z } => {
            let f = build_mul_add(&ctx)?;
            let result = f.run(&[x.into(), y.into(), z.into()])?;
            println!("{} * {} + {} = {}", x, y, z, show(&result));
        }
        Commands::Callback { value, repeat } => {
            let f = build_callback(&ctx, repeat)?;
            let result = f.run(&[value.into()])?;
            println!("result: {}", show(&result));
        }
        Commands::Dump => {
            let f = build_callback(&ctx, 1)?;
            println!("; recorded IR");
            println!("{}", f.dump());
            match f.native_ir() {
                Some(ir) => {
                    println!("; cranelift IR");
                    println!("{}", ir);
                }
                None => println!("; cranelift IR was not captured"),
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn context_config(cli: &Cli) -> anyhow::Result<ContextConfig> {
    let Some(opt_level) = OptLevel::parse(&cli.opt_level) else {
        bail!("unknown optimization level '{}'", cli.opt_level);
    };
    Ok(ContextConfig {
        opt_level,
        unclassified_policy: if cli.degrade {
            UnclassifiedPolicy::DegradeToVoid
        } else {
            UnclassifiedPolicy::Error
        },
        capture_native_ir: matches!(cli.command, Commands::Dump),
        ..ContextConfig::default()
    })
}

fn build_mul_add(ctx: &Context) -> anyhow::Result<Function> {
    let f = ctx.build(|ctx| {
        let mut f = ctx.create_named_function("mul_add", &[Type::Long, Type::Long, Type::Long], Type::Long)?;
        let (x, y, z) = (f.params()[0].clone(), f.params()[1].clone(), f.params()[2].clone());
        let product = f.mul(&x, &y)?;
        let sum = f.add(&product, &z)?;
        f.ret(Some(&sum))?;
        f.compile()?;
        Ok(f)
    })?;
    Ok(f)
}

/// Host side of the `callback` command
fn report(label: HostStr, value: i64) -> i64 {
    println!("host: {} = {}", label.to_str().unwrap_or("<invalid>"), value);
    value * 2
}

/// `f(v)` calls `report("value", v)` `repeat` times, feeding each result
/// into the next call
fn build_callback(ctx: &Context, repeat: u32) -> anyhow::Result<Function> {
    let f = ctx.build(|ctx| {
        let mut f = ctx.create_named_function("callback", &[Type::Long], Type::Long)?;
        let acc = f.create_value(Type::Long)?;
        let input = f.params()[0].clone();
        f.store(&acc, &input)?;
        let label = f.create_str_constant(HostStr::from_static("value"))?;
        for _ in 0..repeat {
            let current = f.load(&acc)?;
            let out = f.bridge_call_fn(report as fn(HostStr, i64) -> i64, &[label.clone(), current])?;
            f.store(&acc, &out[0])?;
        }
        let result = f.load(&acc)?;
        f.ret(Some(&result))?;
        f.compile()?;
        Ok(f)
    })?;
    Ok(f)
}

fn show(value: &RunValue) -> String {
    match value.as_i64() {
        Some(v) => v.to_string(),
        None => format!("{:?}", value),
    }
}
