use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use bfjit::compiler::{compile, CompileOptions};
use bfjit::profiler::Profiler;
use bfjit::tape::Tape;
use bfjit::{ast, opt, parse, Error};

/// Ahead-of-execution JIT compiler for the eight-instruction tape language.
#[derive(Parser)]
#[command(name = "bf", version, about)]
struct Cli {
    /// Program file to compile and run.
    program_file: PathBuf,

    /// Dump the optimized IR tree and a hex dump of the emitted code.
    #[arg(long)]
    debug: bool,

    /// Skip the optimization passes and emit directly from the parsed IR.
    #[arg(long)]
    no_optimize: bool,

    /// Print the wall-clock duration of each phase on stderr.
    #[arg(long)]
    timing: bool,

    /// Elide inline bounds-check scaffolding in the emitted code.
    #[arg(long = "unsafe")]
    unsafe_mode: bool,

    /// Enable the sampling profiler and write folded stacks to this file.
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Tape size in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 65_536)]
    memory: usize,

    /// Initial cursor offset into the tape; must be smaller than the size.
    #[arg(long, value_name = "BYTES", default_value_t = 4_096)]
    memory_offset: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // Validated before anything is allocated.
    if cli.memory_offset >= cli.memory {
        return Err(Error::MemoryLayout {
            size: cli.memory,
            offset: cli.memory_offset,
        }
        .into());
    }

    let source = fs::read(&cli.program_file)
        .with_context(|| format!("could not read {}", cli.program_file.display()))?;

    let mut timer = PhaseTimer::new(cli.timing);

    let mut program = parse::parse(&source).map_err(Error::from)?;
    timer.mark("parse");

    if !cli.no_optimize {
        opt::optimize(&mut program);
        timer.mark("optimize");
    }

    if cli.debug {
        ast::dump_tree(&program, &mut std::io::stderr().lock())?;
    }

    let opts = CompileOptions {
        unsafe_mode: cli.unsafe_mode,
        debug_info: cli.profile.is_some(),
    };
    let mut compiled = compile(&program, &opts)?;
    timer.mark("compile");

    if cli.debug {
        dump_code_hex(compiled.code());
        if let Some(map) = compiled.debug_map() {
            map.dump(&mut std::io::stderr().lock())?;
        }
    }

    let mut tape = Tape::new(cli.memory, cli.memory_offset)?;
    timer.mark("allocate tape");

    let mut profiler = if cli.profile.is_some() {
        let map = compiled
            .take_debug_map()
            .context("profiling requested but no debug map was built")?;
        map.write_perf_map();
        let mut profiler = Profiler::new(map, ast::count_nodes(&program));
        profiler.start()?;
        Some(profiler)
    } else {
        None
    };
    timer.mark("setup profiler");

    let status = compiled.run(&mut tape);
    timer.mark("execute");

    if let Some(profiler) = profiler.as_mut() {
        profiler.stop();
    }

    if let (Some(profiler), Some(path)) = (profiler.as_ref(), cli.profile.as_ref()) {
        let mut file = fs::File::create(path)
            .with_context(|| format!("could not create profile file {}", path.display()))?;
        profiler.write_folded(&program, &mut file)?;
    }

    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}

/// Per-phase wall clock for `--timing`.
struct PhaseTimer {
    enabled: bool,
    last: Instant,
}

impl PhaseTimer {
    fn new(enabled: bool) -> Self {
        PhaseTimer {
            enabled,
            last: Instant::now(),
        }
    }

    fn mark(&mut self, phase: &str) {
        if self.enabled {
            eprintln!("{phase}: {:?}", self.last.elapsed());
        }
        self.last = Instant::now();
    }
}

/// 16-bytes-per-row hex dump of the emitted code, on stderr.
fn dump_code_hex(code: &[u8]) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "Dumping {} bytes of compiled machine code:", code.len());
    for (i, byte) in code.iter().enumerate() {
        if i % 16 == 0 {
            let _ = write!(err, "{i:08x}: ");
        }
        let _ = write!(err, "{byte:02x} ");
        if i % 16 == 15 {
            let _ = writeln!(err);
        }
    }
    if code.len() % 16 != 0 {
        let _ = writeln!(err);
    }
}
