use crate::config::types::{
    exit_code, SandboxConfig, SandboxError, Verdict, DEFAULT_MEMORY_LIMIT_KB,
    DEFAULT_SANDBOX_USER, DEFAULT_TIME_LIMIT_MS,
};
use crate::config::validator::validate_config;
use crate::exec::supervisor::{deadline_for, launch_plan, supervise};
use crate::kernel::credentials::resolve_identity;
use crate::kernel::signal::{InterruptGuard, SupervisorState};
use crate::safety::staging::StagingArea;
use crate::verdict::verdict::{LimitSnapshot, RunReport};
use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

const OUTPUT_HELP: &str = "\
Output:
  1. exited: EXIT_STATUS TIME(ms) MEMORY(KB)
  2. otherwise one of: Time Limit Exceeded | Memory Limit Exceeded | Program Killed | fatal

Exit status:
  0 success, 1 error, 2 fatal, 3 interrupted, 4 time limit, 5 memory limit, 6 runtime error

Notes: PROGRAM must be compiled statically!";

#[derive(Parser, Debug)]
#[command(
    name = "antiskill",
    version,
    about = "Run an untrusted program in a chroot jail under time and memory limits",
    after_help = OUTPUT_HELP
)]
struct Cli {
    /// Time limit in ms, positive integer
    #[arg(
        short = 't',
        value_name = "TIME_LIMIT",
        default_value_t = DEFAULT_TIME_LIMIT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    time_limit: u64,
    /// Memory limit in KiB, positive integer
    #[arg(
        short = 'm',
        value_name = "MEMORY_LIMIT",
        default_value_t = DEFAULT_MEMORY_LIMIT_KB,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    memory_limit: u64,
    /// File fed to the program's stdin
    #[arg(short = 'i', value_name = "INPUT_PATH")]
    input: Option<PathBuf>,
    /// File receiving the program's stdout
    #[arg(short = 'o', value_name = "OUTPUT_PATH")]
    output: Option<PathBuf>,
    /// Unprivileged user the program runs as
    #[arg(short = 'u', long = "user", default_value = DEFAULT_SANDBOX_USER)]
    user: String,
    /// Also write a JSON run report to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Statically linked program to run
    program: PathBuf,
}

impl Cli {
    fn into_config(self) -> SandboxConfig {
        SandboxConfig {
            executable: self.program,
            input: self.input,
            output: self.output,
            time_limit_ms: self.time_limit,
            memory_limit_kb: self.memory_limit,
            sandbox_user: self.user,
            report: self.report,
        }
    }
}

/// Outcome of argument parsing: run a job or exit right away
enum Parsed {
    Run(SandboxConfig),
    Exit(i32),
}

fn parse_args<I, T>(args: I) -> Parsed
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if args.len() < 2 {
        let _ = Cli::command().print_help();
        return Parsed::Exit(exit_code::SUCCESS);
    }

    match Cli::try_parse_from(args) {
        Ok(cli) => Parsed::Run(cli.into_config()),
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Parsed::Exit(exit_code::SUCCESS),
                _ => Parsed::Exit(exit_code::ERROR),
            }
        }
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let config = match parse_args(std::env::args_os()) {
        Parsed::Run(config) => config,
        Parsed::Exit(code) => std::process::exit(code),
    };

    if nix::unistd::geteuid().as_raw() != 0 {
        eprintln!("Warning: antiskill needs root for chroot and privilege drop; the run will be reported as fatal");
    }

    let status = execute(&config);
    std::process::exit(status);
}

/// Run one job end to end and return the exit status for the caller.
/// Prints the verdict line on stdout.
pub fn execute(config: &SandboxConfig) -> i32 {
    if let Err(e) = validate_config(config) {
        eprintln!("Error: {}", e);
        return e.exit_status();
    }

    let limits = LimitSnapshot::from(config);
    let state = SupervisorState::global();

    let _interrupts = match InterruptGuard::install() {
        Ok(guard) => guard,
        Err(e) => return fail(config, limits, e),
    };

    let identity = match resolve_identity(&config.sandbox_user) {
        Ok(identity) => identity,
        Err(e) => return fail(config, limits, e),
    };

    let area = match StagingArea::prepare(config) {
        Ok(area) => area,
        Err(e) => return fail(config, limits, e),
    };

    if state.interrupted() {
        if let Err(cleanup_err) = area.destroy() {
            log::error!("Teardown failed: {}", cleanup_err);
        }
        return fail(config, limits, SandboxError::Interrupted);
    }

    let plan = launch_plan(config, &area, identity);
    let evidence = match supervise(&plan, deadline_for(config), state) {
        Ok(evidence) => evidence,
        Err(e) => {
            if let Err(cleanup_err) = area.destroy() {
                log::error!("Teardown failed: {}", cleanup_err);
            }
            return fail(config, limits, e);
        }
    };

    let report = RunReport::from_evidence(evidence, limits);

    // Setup failures leave no program output to collect.
    let teardown = if report.verdict == Verdict::Fatal {
        area.destroy()
    } else {
        area.finalize(config)
    };

    emit(config, &report);

    match teardown {
        Ok(()) => report.exit_status(),
        Err(e) => {
            log::error!("Teardown failed: {}", e);
            if report.verdict == Verdict::Success {
                exit_code::ERROR
            } else {
                report.exit_status()
            }
        }
    }
}

fn fail(config: &SandboxConfig, limits: LimitSnapshot, err: SandboxError) -> i32 {
    if err.is_infrastructure() {
        log::error!("{}", err);
        emit(config, &RunReport::fatal(limits));
    } else {
        eprintln!("Error: {}", err);
    }
    err.exit_status()
}

fn emit(config: &SandboxConfig, report: &RunReport) {
    println!("{}", report);
    if let Some(path) = &config.report {
        if let Err(e) = report.write_json(path) {
            log::error!("Failed to write report {}: {}", path.display(), e);
        }
    }
}
