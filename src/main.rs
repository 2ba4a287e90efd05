use clap::Parser as ClapParser;
use quill_bytecode::inst::Inst;
use quill_bytecode::{ChunkError, FunctionProto};
use quill_vm::{InterpretResult, Vm, VmConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    let opt = Opt::parse();
    init_logging(opt.trace);

    let proto = match demo_chunk() {
        Ok(proto) => proto,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(InterpretResult::CompileError.exit_code());
        }
    };

    if opt.disassemble {
        print!("{}", quill_bytecode::disasm::disassemble(&proto));
    }

    let mut config = VmConfig::default()
        .with_stress_gc(opt.stress_gc)
        .with_trace_execution(opt.trace);
    if let Some(threshold) = opt.gc_threshold {
        config = config.with_gc_threshold(threshold);
    }

    let mut vm = Vm::new(config);
    let result = match vm.run_proto(&proto) {
        Ok(value) => {
            println!("{}", vm.display(value));
            InterpretResult::Ok
        }
        Err(e) => {
            eprintln!("{}", e);
            InterpretResult::RuntimeError
        }
    };

    let stats = vm.gc_stats();
    tracing::debug!(
        collections = stats.collections,
        objects_freed = stats.objects_freed,
        bytes_freed = stats.bytes_freed,
        "exit"
    );
    std::process::exit(result.exit_code());
}

fn init_logging(trace: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if trace { "warn,quill_vm=trace" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `-((1.2 + 3.4) / 5.6)`
fn demo_chunk() -> Result<FunctionProto, ChunkError> {
    let mut proto = FunctionProto::new(None, 0);
    let chunk = &mut proto.chunk;
    chunk.emit_constant(1.2, 123)?;
    chunk.emit_constant(3.4, 123)?;
    chunk.emit(Inst::Add, 123);
    chunk.emit_constant(5.6, 123)?;
    chunk.emit(Inst::Divide, 123);
    chunk.emit(Inst::Negate, 123);
    chunk.emit(Inst::Return, 123);
    Ok(proto)
}

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Opt {
    /// Print the disassembly of the chunk before running it.
    #[clap(long)]
    disassemble: bool,

    /// Log every executed instruction along with the value stack.
    #[clap(long)]
    trace: bool,

    /// Run a full garbage collection before every allocation.
    #[clap(long)]
    stress_gc: bool,

    /// Heap size in bytes that triggers the first collection.
    #[clap(long)]
    gc_threshold: Option<usize>,
}
