//! rio - repeatable I/O command line interface

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::OnceLock;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use rio::{config, transmat, CancelToken, FilterSpec, PlacementMode, Result, WareID};

const USAGE: &str = "usage: rio [<flags>] <command> [<args> ...]";

#[derive(Parser)]
#[command(name = "rio")]
#[command(about = "Repeatable I/O.")]
#[command(version)]
struct Cli {
    /// output api format [dumb, json]
    #[arg(long, global = true, default_value = "dumb")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// pack a fileset into a ware
    Pack {
        /// pack type
        pack_type: String,

        /// path of the fileset to pack
        path: PathBuf,

        /// warehouse in which to place the ware
        #[arg(long)]
        target: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// unpack a ware into a fileset on your local filesystem
    Unpack {
        /// target path
        path: PathBuf,

        /// ware id, "<packType>:<hash>"
        ware: String,

        /// warehouses from which to fetch the ware
        #[arg(long)]
        source: Vec<String>,

        /// placement mode to use [copy, direct, mount, none]
        #[arg(long, default_value = "copy")]
        placer: String,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// scan a data stream to compute the ware id it would have
    Scan {
        /// pack type
        pack_type: String,

        /// address of the data to scan
        #[arg(long)]
        source: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// set uid filter [keep, mine, <int>]
    #[arg(long)]
    uid: Option<String>,

    /// set gid filter [keep, mine, <int>]
    #[arg(long)]
    gid: Option<String>,

    /// set mtime filter [keep, @<unix>, <rfc3339>]
    #[arg(long)]
    mtime: Option<String>,

    /// keep or zero setuid, setgid, and sticky bits [keep, zero]
    #[arg(long)]
    sticky: Option<String>,
}

impl FilterArgs {
    fn into_spec(self) -> FilterSpec {
        FilterSpec {
            uid: self.uid,
            gid: self.gid,
            mtime: self.mtime,
            sticky: self.sticky,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    let args: Vec<String> = std::env::args().collect();
    let code = run(
        &cancel,
        &args,
        &mut std::io::stdout().lock(),
        &mut std::io::stderr().lock(),
    );
    ExitCode::from(code)
}

/// parse, execute, and emit; returns the process exit code
fn run(cancel: &CancelToken, args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> u8 {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = write!(stdout, "{}", e);
                    0
                }
                _ => {
                    let _ = writeln!(stderr, "{}", USAGE);
                    let _ = writeln!(stderr, "error parsing args: {}", e);
                    2
                }
            };
        }
    };

    let format = cli.format.clone();
    if format != "dumb" && format != "json" {
        let _ = writeln!(stderr, "invalid format {:?} (valid options are 'dumb' or 'json')", format);
        return 2;
    }
    let result = execute(cancel, cli.command);
    emit_result(&format, &result, stdout, stderr);
    match &result {
        Ok(_) => 0,
        Err(e) => e.exit_code(),
    }
}

fn execute(cancel: &CancelToken, command: Commands) -> Result<WareID> {
    match command {
        Commands::Pack {
            pack_type,
            path,
            target,
            filters,
        } => {
            let pack_fn = transmat::pack_tool(&pack_type)?;
            pack_fn(
                cancel,
                &pack_type,
                &path,
                &filters.into_spec(),
                target.as_deref(),
            )
        }

        Commands::Unpack {
            path,
            ware,
            source,
            placer,
            filters,
        } => {
            let ware_id = WareID::parse(&ware)?;
            let unpack_fn = transmat::unpack_tool(ware_id.pack_type())?;
            let mode = PlacementMode::parse(&placer)?;
            unpack_fn(
                cancel,
                &ware_id,
                &path,
                &filters.into_spec(),
                mode,
                &source,
                &config::base_path(),
            )
        }

        Commands::Scan {
            pack_type,
            source,
            filters,
        } => {
            let scan_fn = transmat::scan_tool(&pack_type)?;
            scan_fn(cancel, &pack_type, &filters.into_spec(), source.as_deref())
        }
    }
}

#[derive(Serialize)]
struct Event<'a> {
    prog: Option<()>,
    result: EventResult<'a>,
}

#[derive(Serialize)]
struct EventResult<'a> {
    #[serde(rename = "wareID")]
    ware_id: Option<&'a WareID>,
    error: Option<EventError>,
}

#[derive(Serialize)]
struct EventError {
    category: &'static str,
    message: String,
    details: serde_json::Value,
}

/// route the result to stdout/stderr per the selected format
///
/// dumb: ware id on stdout, errors on stderr. json: one event object on
/// stdout; error messages are additionally mirrored to stderr.
fn emit_result(
    format: &str,
    result: &Result<WareID>,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) {
    match format {
        "json" => {
            if let Err(e) = result {
                let _ = writeln!(stderr, "{}", e);
            }
            let event = Event {
                prog: None,
                result: EventResult {
                    ware_id: result.as_ref().ok(),
                    error: result.as_ref().err().map(|e| EventError {
                        category: e.category(),
                        message: e.to_string(),
                        details: e.details().unwrap_or_else(|| serde_json::json!({})),
                    }),
                },
            };
            match serde_json::to_string(&event) {
                Ok(json) => {
                    let _ = write!(stdout, "{}", json);
                }
                Err(e) => {
                    let _ = writeln!(stderr, "error marshalling event: {}", e);
                }
            }
        }
        _ => match result {
            Ok(ware) => {
                let _ = writeln!(stdout, "{}", ware);
            }
            Err(e) => {
                let _ = writeln!(stderr, "{}", e);
            }
        },
    }
}

static INTERRUPT_TOKEN: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_interrupt(_: nix::libc::c_int) {
    if let Some(token) = INTERRUPT_TOKEN.get() {
        token.cancel();
    }
}

/// a sigint from the terminal flips the cancellation token; pipelines
/// observe it at the next entry or placement boundary
fn install_interrupt_handler(token: CancelToken) {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let _ = INTERRUPT_TOKEN.set(token);
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn run_cli(args: &[&str]) -> (u8, String, String) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let cancel = CancelToken::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(&cancel, &args, &mut stdout, &mut stderr);
        (
            code,
            String::from_utf8(stdout).unwrap(),
            String::from_utf8(stderr).unwrap(),
        )
    }

    #[test]
    fn test_no_args_prints_usage() {
        let (code, stdout, stderr) = run_cli(&["rio"]);
        assert_eq!(code, 2);
        assert!(stdout.is_empty());
        let first_line = stderr.lines().next().unwrap();
        assert!(first_line.starts_with(USAGE));
    }

    #[test]
    fn test_unknown_command_is_usage_error() {
        let (code, stdout, _) = run_cli(&["rio", "teleport"]);
        assert_eq!(code, 2);
        assert!(stdout.is_empty());
    }

    #[test]
    fn test_malformed_ware_id() {
        let (code, _, stderr) = run_cli(&["rio", "unpack", "/tmp/x", "not-a-ware-id"]);
        assert_eq!(code, 2);
        assert!(stderr.contains("malformed ware id"));
    }

    #[test]
    fn test_pack_unpack_via_cli() {
        let work = tempdir().unwrap();
        std::env::set_var("RIO_BASE", work.path().join("rio-base"));

        let src = work.path().join("source");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("hello.txt"), "world").unwrap();
        let wh = work.path().join("warehouse");
        fs::create_dir(&wh).unwrap();
        let wh_addr = format!("file://{}", wh.display());

        // pack: stdout is the ware id plus newline
        let (code, stdout, stderr) = run_cli(&[
            "rio",
            "pack",
            "tar",
            src.to_str().unwrap(),
            &format!("--target={}", wh_addr),
        ]);
        assert_eq!(code, 0, "pack failed: {}", stderr);
        assert!(stdout.starts_with("tar:"));
        assert!(stdout.ends_with('\n'));
        let ware = stdout.trim().to_string();

        // unpack into a fresh target
        let target = work.path().join("target");
        let (code, stdout, stderr) = run_cli(&[
            "rio",
            "unpack",
            target.to_str().unwrap(),
            &ware,
            &format!("--source={}", wh_addr),
        ]);
        assert_eq!(code, 0, "unpack failed: {}", stderr);
        assert_eq!(stdout, format!("{}\n", ware));
        assert_eq!(fs::read(target.join("hello.txt")).unwrap(), b"world");

        // same unpack with json output: one event object, no newline
        let target2 = work.path().join("target2");
        let (code, stdout, _) = run_cli(&[
            "rio",
            "unpack",
            target2.to_str().unwrap(),
            &ware,
            &format!("--source={}", wh_addr),
            "--format=json",
        ]);
        assert_eq!(code, 0);
        assert_eq!(
            stdout,
            format!(
                "{{\"prog\":null,\"result\":{{\"wareID\":\"{}\",\"error\":null}}}}",
                ware
            )
        );

        // flipping a hash character yields exit 6 and a mismatch report
        let mut mangled = ware.clone();
        let flip = if mangled.ends_with('2') { '3' } else { '2' };
        mangled.pop();
        mangled.push(flip);
        let target3 = work.path().join("target3");
        let (code, _, stderr) = run_cli(&[
            "rio",
            "unpack",
            target3.to_str().unwrap(),
            &mangled,
            &format!("--source={}", wh_addr),
        ]);
        assert_eq!(code, 6);
        assert!(stderr.contains("hash mismatch"));
        assert!(!target3.exists());
    }

    #[test]
    fn test_ware_not_found_exit_code() {
        let work = tempdir().unwrap();
        std::env::set_var("RIO_BASE", work.path().join("rio-base"));
        let wh = work.path().join("warehouse");
        fs::create_dir(&wh).unwrap();

        let (code, _, _) = run_cli(&[
            "rio",
            "unpack",
            work.path().join("t").to_str().unwrap(),
            "tar:29W21ZRbt3P8mRGrRAdSFdJjVjxsTRgMWoQs1DCBfPDKx5N7pTRTHmq9rpSgU7FZNb",
            &format!("--source=file://{}", wh.display()),
        ]);
        // a reachable but empty warehouse exhausts the failover loop
        assert_eq!(code, 3);
    }
}
