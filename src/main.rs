use dynlib::sys::orbis::{DynlibInfoEx, Segment, TlsInfo};
use dynlib::{ListBound, ModuleBuilder, Process, ProcessBuilder, Status, SyscallArgs, dispatch, nid};
use std::{env, process::exit};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const SYS_DYNLIB_DLSYM: u32 = 591;
const SYS_DYNLIB_GET_LIST: u32 = 592;
const SYS_DYNLIB_GET_PROC_PARAM: u32 = 598;
const SYS_DYNLIB_GET_INFO_EX: u32 = 608;

enum Command {
    /// Print the NIDs (or full lookup keys) of symbol names.
    Nid {
        library: Option<String>,
        symbols: Vec<String>,
    },
    /// Walk a sample process through the guest startup sequence.
    Demo,
}

struct Opts {
    command: Command,

    /// Reproduce the reference kernel's handle list overrun.
    compat_list_bound: bool,

    /// Panic where the reference kernel breaks into the debugger.
    trap: bool,
}

fn main() {
    setup_logging();

    let args: Vec<String> = env::args().collect();
    let Some(opts) = parse_opts(&args) else {
        eprintln!("usage: dynlib nid [--lib <name>] <symbol>...");
        eprintln!("       dynlib demo [--compat-list-bound] [--trap]");
        exit(1);
    };

    match opts.command {
        Command::Nid { library, symbols } => print_nids(library.as_deref(), &symbols),
        Command::Demo => {
            let bound = if opts.compat_list_bound {
                ListBound::Compat
            } else {
                ListBound::Exact
            };
            let builder = ProcessBuilder::new()
                .list_bound(bound)
                .trap_diagnostics(opts.trap);
            let process = match sample_process(builder) {
                Ok(process) => process,
                Err(err) => {
                    eprintln!("failed to load sample modules: {}", err);
                    exit(1);
                }
            };
            if let Err(status) = startup_sequence(&process) {
                eprintln!("startup sequence failed: {:?}", status);
                exit(1);
            }
        }
    }
}

fn parse_opts(args: &[String]) -> Option<Opts> {
    let mut compat_list_bound = false;
    let mut trap = false;
    let mut library = None;
    let mut symbols = Vec::new();

    let command = args.get(1)?.as_str();
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--compat-list-bound" => compat_list_bound = true,
            "--trap" => trap = true,
            "--lib" => {
                i += 1;
                library = Some(args.get(i)?.clone());
            }
            symbol => symbols.push(symbol.to_string()),
        }
        i += 1;
    }

    let command = match command {
        "nid" if !symbols.is_empty() => Command::Nid { library, symbols },
        "demo" => Command::Demo,
        _ => return None,
    };
    Some(Opts {
        command,
        compat_list_bound,
        trap,
    })
}

fn print_nids(library: Option<&str>, symbols: &[String]) {
    for symbol in symbols {
        let nid = nid::encode(symbol);
        match library {
            Some(library) => println!("{}\t{}", symbol, nid::lookup_key(&nid, library)),
            None => println!("{}\t{}", symbol, nid),
        }
    }
}

fn sample_process(builder: ProcessBuilder) -> dynlib::Result<Process> {
    let main = ModuleBuilder::new("eboot.bin")
        .segments(
            Segment {
                address: 0x40_0000,
                size: 0x20_0000,
            },
            Segment {
                address: 0x60_0000,
                size: 0x4_0000,
            },
        )
        .proc_param(0x61_0000, 0x68)
        .build();
    let process = builder.build(main);

    process.load(
        ModuleBuilder::new("libkernel")
            .segments(
                Segment {
                    address: 0x8_0000_0000,
                    size: 0x4_8000,
                },
                Segment {
                    address: 0x8_0004_8000,
                    size: 0x1_0000,
                },
            )
            .init_fini(0x8_0000_0000, 0x8_0000_0040)
            .export("sceKernelGetProcParam", 0x8_0000_1230)
            .export("sceKernelLoadStartModule", 0x8_0000_2440)
            .build(),
    )?;
    process.load(
        ModuleBuilder::new("libc")
            .segments(
                Segment {
                    address: 0x8_0010_0000,
                    size: 0xc_0000,
                },
                Segment {
                    address: 0x8_001c_0000,
                    size: 0x2_0000,
                },
            )
            .tls(TlsInfo {
                init_addr: 0x8_001c_8000,
                index: 2,
                align: 16,
                init_size: 0x40,
                size: 0x120,
            })
            .init_fini(0x8_0010_0000, 0x8_0010_0080)
            .export("printf", 0x8_0010_4a10)
            .export("malloc", 0x8_0010_8c20)
            .build(),
    )?;
    Ok(process)
}

fn startup_sequence(process: &Process) -> Result<(), Status> {
    let mut handles = [0u32; 16];
    let mut count = 0u64;
    // The buffer advertises one slot less than it has so the compat bound
    // can overrun into the spare slot.
    let capacity = handles.len() as u64 - 1;
    syscall(
        process,
        SYS_DYNLIB_GET_LIST,
        &[handles.as_mut_ptr() as u64, capacity, (&raw mut count) as u64],
    )?;
    debug!("{} modules reported", count);

    // Under the compat bound the count may run ahead of the handles written.
    let written = (count as usize).min(capacity as usize + 1);
    for &handle in &handles[..written] {
        let mut info = DynlibInfoEx::new();
        syscall(
            process,
            SYS_DYNLIB_GET_INFO_EX,
            &[handle as u64, 1, (&raw mut info) as u64],
        )?;
        println!(
            "{:>3} {:<12} refs={} init=0x{:x} tls={}",
            info.handle,
            String::from_utf8_lossy(info.name()),
            info.ref_count,
            info.init_proc_addr,
            if info.tls_init_addr != 0 {
                format!("#{} {}B", info.tls_index, info.tls_size)
            } else {
                "-".to_string()
            }
        );
    }

    let mut addr = 0u64;
    let libc_module = process
        .modules()
        .list()
        .into_iter()
        .find(|m| m.name == "libc")
        .ok_or(Status::Srch)?;
    syscall(
        process,
        SYS_DYNLIB_DLSYM,
        &[
            libc_module.handle() as u64,
            c"printf".as_ptr() as u64,
            (&raw mut addr) as u64,
        ],
    )?;
    println!("printf -> 0x{:x}", addr);

    let mut data = 0u64;
    let mut size = 0u64;
    syscall(
        process,
        SYS_DYNLIB_GET_PROC_PARAM,
        &[(&raw mut data) as u64, (&raw mut size) as u64],
    )?;
    println!("proc param at 0x{:x} ({} bytes)", data, size);
    Ok(())
}

fn syscall(process: &Process, number: u32, args: &[u64]) -> Result<(), Status> {
    // SAFETY: every pointer argument refers to a live local of the caller
    // sized for the syscall's guest ABI.
    match unsafe { dispatch(process, number, &SyscallArgs::new(args)) } {
        Status::Ok => Ok(()),
        status => Err(status),
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
