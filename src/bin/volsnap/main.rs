use anyhow::Result;
use env_logger::{Builder, Env};

mod cli;
mod cmd_haves;
mod cmd_init;
mod cmd_receive;
mod cmd_send;
mod cmd_snapshot;
mod cmd_status;
mod cmd_verify;
mod cmd_volume;
mod util;

fn init_logger() {
    // Level from RUST_LOG, default info. Logs go to stderr; stdout may carry a stream.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse_args();
    match cli.cmd {
        cli::Cmd::Init {
            path,
            engine,
            zfs_parent,
        } => cmd_init::exec(path, engine, zfs_parent),

        cli::Cmd::Status { path, json } => cmd_status::exec(path, json),

        cli::Cmd::NewVolume { path } => cmd_volume::exec_new(path),

        cli::Cmd::DestroyVolume { path, volume } => cmd_volume::exec_destroy(path, volume),

        cli::Cmd::List { path, json } => cmd_volume::exec_list(path, json),

        cli::Cmd::Snapshot { path, volume } => cmd_snapshot::exec_create(path, volume),

        cli::Cmd::DeleteSnapshot { path, snapshot } => {
            cmd_snapshot::exec_delete(path, snapshot)
        }

        cli::Cmd::Chain { path, snapshot } => cmd_snapshot::exec_chain(path, snapshot),

        cli::Cmd::Send {
            path,
            snapshot,
            base,
            haves_file,
            out,
        } => cmd_send::exec(path, snapshot, base, haves_file, out),

        cli::Cmd::Receive { path, from } => cmd_receive::exec(path, from),

        cli::Cmd::Haves { path, along, out } => cmd_haves::exec(path, along, out),

        cli::Cmd::Verify {
            path,
            snapshot,
            expect,
        } => cmd_verify::exec(path, snapshot, expect),
    }
}
